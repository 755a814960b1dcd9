//! Archive settings: just the per-archive salt used for key derivation.
//!
//! On-disk layout, written through the encrypted envelope is skipped here —
//! settings are written in the clear, since the salt is not a secret and the
//! password is needed to *use* it anyway:
//!
//! ```text
//! settings record := u32_le salt_len || salt bytes
//! ```

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::crypto::generate_salt;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed settings record")]
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    salt: Vec<u8>,
}

impl Settings {
    /// Generates fresh settings for a brand-new archive.
    pub fn generate() -> Self {
        Self { salt: generate_salt() }
    }

    pub fn with_salt(salt: Vec<u8>) -> Self {
        Self { salt }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, SettingsError> {
        let len = r.read_u32::<LittleEndian>()? as usize;
        if len == 0 || len > 4096 {
            return Err(SettingsError::Malformed);
        }
        let mut salt = vec![0u8; len];
        r.read_exact(&mut salt)?;
        Ok(Self { salt })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), SettingsError> {
        w.write_u32::<LittleEndian>(self.salt.len() as u32)?;
        w.write_all(&self.salt)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let s = Settings::generate();
        let mut buf = Vec::new();
        s.write_to(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let s2 = Settings::read_from(&mut cursor).unwrap();
        assert_eq!(s, s2);
    }

    #[test]
    fn rejects_truncated_record() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(16).unwrap();
        buf.extend_from_slice(&[0u8; 4]); // declared 16, only 4 present
        let mut cursor = &buf[..];
        assert!(Settings::read_from(&mut cursor).is_err());
    }
}
