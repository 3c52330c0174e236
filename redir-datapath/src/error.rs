//! Datapath error type.

use std::io;
use thiserror::Error;

/// Datapath errors.
///
/// Only mutation failures reach this type on the per-packet path; traffic that
/// simply does not match is reported as a pass verdict, not an error.
#[derive(Debug, Error)]
pub enum DatapathError {
    #[error("Access of {len} bytes at offset {offset} exceeds packet length {packet_len}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        packet_len: usize,
    },

    #[error("Unsupported checksum field width: old {old} bytes, new {new} bytes")]
    FieldWidth { old: usize, new: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DatapathError>;
