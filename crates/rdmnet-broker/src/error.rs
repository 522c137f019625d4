// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker-level error type.
//!
//! Wraps `rdmnet_core::error::Error` (wire/transport/discovery failures)
//! with the capacity and routing failures that only make sense once a
//! registry and routing engine exist. Hand-written `Display`/`Error` rather
//! than `thiserror`, matching the teacher's `ServerError` and keeping both
//! crates in the same style.

use std::fmt;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug)]
pub enum BrokerError {
    Config(String),
    Bind(String),
    AlreadyRunning,
    Core(rdmnet_core::error::Error),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Config(s) => write!(f, "configuration error: {s}"),
            BrokerError::Bind(s) => write!(f, "bind error: {s}"),
            BrokerError::AlreadyRunning => write!(f, "broker is already running"),
            BrokerError::Core(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Core(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rdmnet_core::error::Error> for BrokerError {
    fn from(e: rdmnet_core::error::Error) -> Self {
        BrokerError::Core(e)
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Core(rdmnet_core::error::Error::Io(e))
    }
}

impl From<crate::config::ConfigError> for BrokerError {
    fn from(e: crate::config::ConfigError) -> Self {
        BrokerError::Config(e.to_string())
    }
}
