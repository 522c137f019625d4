// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error and result types.

use std::fmt;

/// Result alias used throughout `rdmnet-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the connection, codec, buffer, and discovery layers.
///
/// Only the coarse variants that an application callback surface needs to
/// react to are public API; fine-grained parse failures are logged at the
/// point of discovery and folded into one of these at the boundary.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// Scope string is empty or longer than 62 bytes.
    InvalidScope(String),
    /// Listen/remote address could not be parsed or bound.
    InvalidAddress(String),
    /// `listen_addrs` was empty, or port 0 was requested with more than one address.
    InvalidListenConfig(String),

    // ========================================================================
    // Protocol errors
    // ========================================================================
    /// A PDU failed to parse (bad length, truncated header, bad vector at a
    /// required position).
    MalformedPdu(String),
    /// An outer-level vector was not recognized; the caller should skip the
    /// block rather than treat this as fatal.
    UnknownVector(u32),
    /// A PDU's declared length did not agree with its contents or its
    /// enclosing block.
    LengthMismatch { declared: usize, actual: usize },
    /// A destination buffer was too small for an encode operation.
    BufferTooSmall,
    /// `feed()` was given more bytes than the receive buffer has room for;
    /// the connection carrying this buffer must be torn down.
    BufferOverflow,

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// Underlying I/O failure (EOF, ECONNRESET, ETIMEDOUT, ...).
    Io(std::io::Error),
    /// A send to a full, backpressured queue.
    QueueFull,

    // ========================================================================
    // Discovery errors
    // ========================================================================
    /// No usable multicast interface/socket could be initialized for either
    /// IP family.
    DiscoveryInit(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidScope(s) => write!(f, "invalid scope: {s}"),
            Error::InvalidAddress(s) => write!(f, "invalid address: {s}"),
            Error::InvalidListenConfig(s) => write!(f, "invalid listen configuration: {s}"),
            Error::MalformedPdu(s) => write!(f, "malformed PDU: {s}"),
            Error::UnknownVector(v) => write!(f, "unknown vector: 0x{v:08x}"),
            Error::LengthMismatch { declared, actual } => {
                write!(f, "length mismatch: declared {declared}, actual {actual}")
            }
            Error::BufferTooSmall => write!(f, "buffer too small"),
            Error::BufferOverflow => write!(f, "receive buffer overflow"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::QueueFull => write!(f, "send queue full"),
            Error::DiscoveryInit(s) => write!(f, "discovery init failed: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
