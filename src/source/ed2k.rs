use serde::{Deserialize, Serialize};

use crate::{Result, StorageError};

const PREFIX: &str = "ed2k://|file|";

/// A parsed `ed2k://|file|<name>|<size>|<md4 hex>|/` link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed2kLink {
    pub filename: String,
    pub size: u64,
    pub hash: [u8; 16],
}

impl Ed2kLink {
    pub fn parse(link: &str) -> Result<Self> {
        let invalid = || StorageError::InvalidLink(link.to_string());

        let body = link.trim().strip_prefix(PREFIX).ok_or_else(invalid)?;
        let mut fields = body.split('|');

        let filename = fields.next().filter(|f| !f.is_empty()).ok_or_else(invalid)?;
        let size = fields
            .next()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let hash_hex = fields.next().filter(|h| h.len() == 32).ok_or_else(invalid)?;

        let mut hash = [0u8; 16];
        hex::decode_to_slice(hash_hex, &mut hash).map_err(|_| invalid())?;

        // anything after the hash must be the closing "/" segment
        match fields.next() {
            Some("/") => {}
            _ => return Err(invalid()),
        }

        if filename.contains('/') || filename.contains('\\') || filename == ".." || filename == "." {
            return Err(invalid());
        }

        Ok(Self {
            filename: filename.to_string(),
            size,
            hash,
        })
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}
