use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use coffer::archive::Archive;
use coffer::pipeline::{self, CleanLocation};
use coffer::storage::local::LocalFilesystemProvider;
use coffer::storage::StorageProvider;

#[derive(Parser)]
#[command(name = "coffer", version, about = "Encrypted, incremental, content-addressed file-tree backup engine")]
struct Cli {
    /// The name of the backup archive.
    #[arg(long, global = true, default_value = "backup")]
    name: String,
    /// The local directory to back up and/or restore.
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,
    /// Degree of parallelism for the worker pool; defaults to available CPUs.
    #[arg(short = 'p', global = true)]
    parallelism: Option<usize>,

    #[command(flatten)]
    backend: BackendArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BackendArgs {
    /// Storage backend to use.
    #[arg(long, value_enum, default_value = "local", global = true)]
    backend: Backend,
    /// Local filesystem backend: directory archives are stored under.
    #[arg(long, default_value = ".coffer-store", global = true)]
    root: PathBuf,
    /// S3 backend: bucket name (required when `--backend s3`).
    #[arg(long, global = true)]
    bucket: Option<String>,
    /// S3 backend: custom endpoint URL, for S3-compatible services.
    #[arg(long, global = true)]
    endpoint: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    S3,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload new or modified files to the archive.
    Backup,
    /// Recreate files present in the archive but missing locally.
    Restore,
    /// Remove files from one side that are missing on the other.
    Clean {
        /// Which side to prune: 'backup' removes objects missing locally,
        /// 'local' removes local files the archive has no record of.
        #[arg(short = 'l', long = "location", value_enum, default_value = "backup")]
        location: CleanLocationArg,
    },
    /// Report counts of files needing backup, restore, or already in sync.
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum CleanLocationArg {
    Backup,
    Local,
}

impl From<CleanLocationArg> for CleanLocation {
    fn from(v: CleanLocationArg) -> Self {
        match v {
            CleanLocationArg::Backup => CleanLocation::Backup,
            CleanLocationArg::Local => CleanLocation::Local,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    coffer::logging::init();
    let cli = Cli::parse();

    let backup_name = cli.name.trim();
    if backup_name.is_empty() {
        eprintln!("error: the backup name must not be empty");
        std::process::exit(1);
    }

    let storage = build_storage(&cli.backend, backup_name)?;
    let local_root = std::fs::canonicalize(&cli.path).unwrap_or(cli.path.clone());
    let parallelism = cli
        .parallelism
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

    let password = rpassword::prompt_password("Please enter your password: ")?;
    tracing::info!(archive = backup_name, path = %local_root.display(), "opening archive");

    let archive = match Archive::open(password, local_root.clone(), storage) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: failed to open archive: {e}");
            std::process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let _ = ctrlc::set_handler(move || {
            tracing::warn!("interrupt received, shutting down");
            stop.store(true, Ordering::SeqCst);
        });
    }

    match cli.command {
        Commands::Backup => {
            let report = pipeline::backup(&archive, &local_root, parallelism, stop);
            tracing::info!(succeeded = report.succeeded, failed = report.failed, "backup finished");
        }
        Commands::Restore => {
            let report = pipeline::restore(&archive, &local_root, parallelism, stop);
            tracing::info!(succeeded = report.succeeded, failed = report.failed, "restore finished");
        }
        Commands::Clean { location } => {
            let report = pipeline::clean(&archive, &local_root, location.into(), parallelism, stop);
            tracing::info!(succeeded = report.succeeded, failed = report.failed, "clean finished");
        }
        Commands::Status => {
            let report = pipeline::status(&archive, &local_root);
            println!("to back up: {}", report.to_backup);
            println!("to restore: {}", report.to_restore);
            println!("in sync:    {}", report.in_sync);
        }
    }

    if let Err(e) = archive.close() {
        tracing::error!(error = %e, "failed to close archive cleanly");
    }

    Ok(())
}

fn build_storage(args: &BackendArgs, backup_name: &str) -> Result<Arc<dyn StorageProvider>, Box<dyn std::error::Error>> {
    match args.backend {
        Backend::Local => {
            let dir = args.root.join(backup_name);
            Ok(Arc::new(LocalFilesystemProvider::new(dir)?))
        }
        Backend::S3 => {
            #[cfg(feature = "s3")]
            {
                let bucket = args.bucket.clone().ok_or("the --bucket flag is required for --backend s3")?;
                let provider = coffer::storage::cloud::CloudStorageProvider::new(bucket, backup_name.to_string(), args.endpoint.clone())?;
                Ok(Arc::new(provider))
            }
            #[cfg(not(feature = "s3"))]
            {
                Err("this build was compiled without the `s3` feature".into())
            }
        }
    }
}
