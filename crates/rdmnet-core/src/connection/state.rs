// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection state machine states (`spec.md` §4.6).

/// States of one RDMnet client-to-broker connection attempt and its
/// subsequent lifetime.
///
/// ```text
///   NotStarted --connect()--> ConnectPending --tcp ok--> RdmnetConnPending
///        ^                         |                           |
///        |                     tcp fails                  ConnectReply ok
///        |                         v                           v
///        +-------------------- Backoff                     Heartbeat
///                                                                |
///                                                     disconnect/timeout
///                                                                v
///                                                       DisconnectPending
///                                                                |
///                                                                v
///                                                     MarkedForDestruction
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has been made yet.
    NotStarted,
    /// Non-blocking TCP connect is in flight.
    ConnectPending,
    /// TCP is up; waiting for the broker's `ConnectReply`.
    RdmnetConnPending,
    /// Fully handshaked; sending/receiving application traffic and
    /// heartbeats.
    Heartbeat,
    /// A `Disconnect` PDU has been sent or received; draining before close.
    DisconnectPending,
    /// Waiting out a backoff delay before the next connect attempt.
    Backoff,
    /// Terminal: the owner should drop this connection.
    MarkedForDestruction,
}

impl ConnectionState {
    pub fn is_operational(self) -> bool {
        matches!(self, ConnectionState::Heartbeat)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::MarkedForDestruction)
    }

    pub fn can_send_application_data(self) -> bool {
        matches!(self, ConnectionState::Heartbeat)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::NotStarted => "NotStarted",
            ConnectionState::ConnectPending => "ConnectPending",
            ConnectionState::RdmnetConnPending => "RdmnetConnPending",
            ConnectionState::Heartbeat => "Heartbeat",
            ConnectionState::DisconnectPending => "DisconnectPending",
            ConnectionState::Backoff => "Backoff",
            ConnectionState::MarkedForDestruction => "MarkedForDestruction",
        };
        write!(f, "{s}")
    }
}
