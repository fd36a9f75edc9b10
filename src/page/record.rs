//! Fixed-size record payload.

use crate::error::{Result, TreeError};
use crate::types::RECORD_SIZE;
use std::fmt;

/// A record value: an opaque 120-byte payload.
///
/// By convention the payload is NUL-terminated text of at most 119 bytes,
/// but nothing in the engine depends on that.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Record([u8; RECORD_SIZE]);

impl Record {
    /// Build a record from raw bytes. The source must leave room for the
    /// trailing NUL of the text convention.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= RECORD_SIZE {
            return Err(TreeError::ValueTooLarge {
                size: bytes.len(),
                max: RECORD_SIZE - 1,
            });
        }
        let mut buf = [0u8; RECORD_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Reconstruct a record from a full on-disk value slot
    pub fn from_slot(slot: &[u8; RECORD_SIZE]) -> Self {
        Self(*slot)
    }

    /// The full 120-byte slot
    pub fn as_bytes(&self) -> &[u8; RECORD_SIZE] {
        &self.0
    }

    /// The payload up to the first NUL, decoded lossily as text
    pub fn as_text(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(RECORD_SIZE);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record({:?})", self.as_text())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}
