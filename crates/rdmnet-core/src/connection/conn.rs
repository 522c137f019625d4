// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The RDMnet client connection state machine: TCP connect, handshake,
//! heartbeat, backoff, and graceful disconnect (`spec.md` §4.6).
//!
//! This type owns no socket. It is driven by a caller (the polled-socket
//! dispatcher in `rdmnet-core`, or a `tokio` task in `rdmnet-broker`) that
//! feeds it received bytes and timer ticks, and carries out the
//! [`ConnectionAction`]s it returns.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::buffer::{ParseOutcome, RecvBuffer};
use crate::codec::broker::{BrokerPdu, ConnectStatusCode, DisconnectReason};
use crate::codec::client_entry::ClientEntry;
use crate::codec::cursor::CursorMut;
use crate::codec::root::{framed_len, RootPdu};
use crate::codec::{RdmnetMessage, RootVector};
use crate::config::ConnectionConfig;
use crate::connection::backoff::Backoff;
use crate::connection::heartbeat::HeartbeatTracker;
use crate::connection::state::ConnectionState;
use crate::error::Result;
use crate::ids::{Cid, Scope};

/// Side effects a [`Connection`] wants its driver to carry out.
#[derive(Debug)]
pub enum ConnectionAction {
    /// Initiate a non-blocking TCP connect to this address.
    Connect(SocketAddr),
    /// Write these bytes to the socket.
    Send(Vec<u8>),
    /// Wait at least this long before calling `tick()` again for a backoff
    /// retry (the driver may still call `tick()` sooner; it's a no-op).
    WaitBackoff(Duration),
    /// An application message arrived; hand it to the owner.
    MessageReady(RdmnetMessage),
    /// The connection has ended; the driver should close the socket. A
    /// `None` reason means the peer closed without sending `Disconnect`.
    Closed { reason: Option<DisconnectReason> },
}

/// Everything the state machine needs to build its own `Connect` PDU.
#[derive(Clone, Debug)]
pub struct LocalIdentity {
    pub cid: Cid,
    pub scope: Scope,
    pub e133_version: u16,
    pub client_entry: ClientEntry,
}

/// One client-to-broker connection's state machine.
pub struct Connection {
    state: ConnectionState,
    remote_addr: SocketAddr,
    identity: LocalIdentity,
    recv_buffer: RecvBuffer,
    heartbeat: HeartbeatTracker,
    backoff: Backoff,
    backoff_deadline: Option<Instant>,
    cfg: ConnectionConfig,
}

impl Connection {
    pub fn new(remote_addr: SocketAddr, identity: LocalIdentity, cfg: ConnectionConfig, now: Instant) -> Self {
        let heartbeat = HeartbeatTracker::new(cfg.heartbeat_send_interval, cfg.heartbeat_timeout, now);
        let backoff = Backoff::new(cfg.backoff_start, cfg.backoff_cap);
        Self {
            state: ConnectionState::NotStarted,
            remote_addr,
            identity,
            recv_buffer: RecvBuffer::new(cfg.recv_buffer_capacity),
            heartbeat,
            backoff,
            backoff_deadline: None,
            cfg,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Begin the first connect attempt.
    pub fn start(&mut self) -> Vec<ConnectionAction> {
        debug_assert_eq!(self.state, ConnectionState::NotStarted);
        self.state = ConnectionState::ConnectPending;
        vec![ConnectionAction::Connect(self.remote_addr)]
    }

    /// The driver's non-blocking TCP connect completed successfully.
    pub fn on_tcp_connected(&mut self, now: Instant) -> Vec<ConnectionAction> {
        self.state = ConnectionState::RdmnetConnPending;
        self.heartbeat = HeartbeatTracker::new(self.cfg.heartbeat_send_interval, self.cfg.heartbeat_timeout, now);
        vec![ConnectionAction::Send(self.encode_connect())]
    }

    /// The TCP connect attempt failed, or an established connection's
    /// socket reported an error.
    pub fn on_io_error(&mut self, now: Instant) -> Vec<ConnectionAction> {
        let delay = self.backoff.next_delay();
        self.state = ConnectionState::Backoff;
        self.backoff_deadline = Some(now + delay);
        vec![ConnectionAction::WaitBackoff(delay)]
    }

    /// Bytes arrived on the socket.
    pub fn on_bytes_received(&mut self, bytes: &[u8], now: Instant) -> Result<Vec<ConnectionAction>> {
        self.recv_buffer.feed(bytes)?;
        let mut actions = Vec::new();
        loop {
            match self.recv_buffer.try_parse()? {
                ParseOutcome::Incomplete => break,
                ParseOutcome::SkippedBadBlock(_) => continue,
                ParseOutcome::Message(message) => {
                    self.heartbeat.note_received(now);
                    actions.extend(self.handle_message(message, now));
                }
            }
        }
        Ok(actions)
    }

    fn handle_message(&mut self, message: RdmnetMessage, now: Instant) -> Vec<ConnectionAction> {
        match (&self.state, &message) {
            (ConnectionState::RdmnetConnPending, RdmnetMessage::Broker(BrokerPdu::ConnectReply { code, .. })) => {
                if *code == ConnectStatusCode::Ok {
                    self.state = ConnectionState::Heartbeat;
                    self.backoff.reset();
                    self.heartbeat.note_sent(now);
                    vec![]
                } else {
                    let delay = self.backoff.next_delay();
                    self.state = ConnectionState::Backoff;
                    self.backoff_deadline = Some(now + delay);
                    vec![ConnectionAction::WaitBackoff(delay)]
                }
            }
            (_, RdmnetMessage::Broker(BrokerPdu::Null)) => vec![],
            (_, RdmnetMessage::Broker(BrokerPdu::Disconnect { reason })) => {
                self.state = ConnectionState::MarkedForDestruction;
                vec![ConnectionAction::Closed { reason: Some(*reason) }]
            }
            _ => vec![ConnectionAction::MessageReady(message)],
        }
    }

    /// Timer tick; drives heartbeat send/timeout and backoff expiry.
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Heartbeat => {
                let mut actions = Vec::new();
                if self.heartbeat.has_timed_out(now) {
                    self.state = ConnectionState::MarkedForDestruction;
                    actions.push(ConnectionAction::Closed { reason: None });
                } else if self.heartbeat.should_send(now) {
                    self.heartbeat.note_sent(now);
                    actions.push(ConnectionAction::Send(self.encode_null()));
                }
                actions
            }
            ConnectionState::Backoff => {
                if self.backoff_deadline.is_some_and(|d| now >= d) {
                    self.backoff_deadline = None;
                    self.state = ConnectionState::ConnectPending;
                    vec![ConnectionAction::Connect(self.remote_addr)]
                } else {
                    vec![]
                }
            }
            _ => vec![],
        }
    }

    /// Send a graceful `Disconnect` and transition toward teardown.
    pub fn request_disconnect(&mut self, reason: DisconnectReason) -> Vec<ConnectionAction> {
        if !matches!(
            self.state,
            ConnectionState::Heartbeat | ConnectionState::RdmnetConnPending
        ) {
            self.state = ConnectionState::MarkedForDestruction;
            return vec![ConnectionAction::Closed { reason: None }];
        }
        self.state = ConnectionState::DisconnectPending;
        vec![
            ConnectionAction::Send(self.encode_disconnect(reason)),
            ConnectionAction::Closed { reason: Some(reason) },
        ]
    }

    /// Encode an application-level RPT message for sending, if the
    /// connection is in a state that allows it.
    pub fn encode_rpt(&self, pdu: crate::codec::rpt::RptPdu) -> Option<Vec<u8>> {
        if !self.state.can_send_application_data() {
            return None;
        }
        let root = RootPdu {
            sender_cid: self.identity.cid,
            vector: RootVector::Rpt(vec![pdu]),
        };
        Some(self.encode_root(&root))
    }

    fn encode_connect(&self) -> Vec<u8> {
        let root = RootPdu {
            sender_cid: self.identity.cid,
            vector: RootVector::Broker(vec![BrokerPdu::Connect {
                scope: self.identity.scope.clone(),
                e133_version: self.identity.e133_version,
                client_entry: self.identity.client_entry.clone(),
            }]),
        };
        self.encode_root(&root)
    }

    fn encode_null(&self) -> Vec<u8> {
        let root = RootPdu {
            sender_cid: self.identity.cid,
            vector: RootVector::Broker(vec![BrokerPdu::Null]),
        };
        self.encode_root(&root)
    }

    fn encode_disconnect(&self, reason: DisconnectReason) -> Vec<u8> {
        let root = RootPdu {
            sender_cid: self.identity.cid,
            vector: RootVector::Broker(vec![BrokerPdu::Disconnect { reason }]),
        };
        self.encode_root(&root)
    }

    fn encode_root(&self, root: &RootPdu) -> Vec<u8> {
        let mut buf = vec![0u8; framed_len(4096)];
        let written = {
            let mut cur = CursorMut::new(&mut buf);
            root.pack(&mut cur).expect("buffer sized generously above actual PDU size");
            cur.offset()
        };
        buf.truncate(written);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::client_entry::{ClientEntryData, ClientType};
    use crate::ids::Uid;

    fn identity() -> LocalIdentity {
        LocalIdentity {
            cid: Cid::new([1; 16]),
            scope: Scope::default_scope(),
            e133_version: 1,
            client_entry: ClientEntry {
                cid: Cid::new([1; 16]),
                data: ClientEntryData::Rpt {
                    uid: Uid::new(0x6574, 1),
                    client_type: ClientType::Controller,
                    binding_cid: Cid::new([0; 16]),
                },
            },
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:8888".parse().unwrap()
    }

    #[test]
    fn happy_path_handshake_reaches_heartbeat_state() {
        let now = Instant::now();
        let mut conn = Connection::new(addr(), identity(), ConnectionConfig::default(), now);
        let actions = conn.start();
        assert!(matches!(actions[0], ConnectionAction::Connect(_)));
        assert_eq!(conn.state(), ConnectionState::ConnectPending);

        let actions = conn.on_tcp_connected(now);
        assert!(matches!(actions[0], ConnectionAction::Send(_)));
        assert_eq!(conn.state(), ConnectionState::RdmnetConnPending);

        let reply = encode_connect_reply(ConnectStatusCode::Ok);
        let actions = conn.on_bytes_received(&reply, now).unwrap();
        assert!(actions.is_empty());
        assert_eq!(conn.state(), ConnectionState::Heartbeat);
    }

    #[test]
    fn connect_refused_enters_backoff() {
        let now = Instant::now();
        let mut conn = Connection::new(addr(), identity(), ConnectionConfig::default(), now);
        conn.start();
        conn.on_tcp_connected(now);

        let reply = encode_connect_reply(ConnectStatusCode::ScopeMismatch);
        let actions = conn.on_bytes_received(&reply, now).unwrap();
        assert!(matches!(actions[0], ConnectionAction::WaitBackoff(_)));
        assert_eq!(conn.state(), ConnectionState::Backoff);
    }

    #[test]
    fn io_error_during_connect_schedules_backoff_then_retries() {
        let t0 = Instant::now();
        let mut conn = Connection::new(addr(), identity(), ConnectionConfig::default(), t0);
        conn.start();
        let actions = conn.on_io_error(t0);
        let delay = match actions[0] {
            ConnectionAction::WaitBackoff(d) => d,
            _ => panic!("expected WaitBackoff"),
        };
        assert_eq!(conn.state(), ConnectionState::Backoff);

        let actions = conn.tick(t0 + delay);
        assert!(matches!(actions[0], ConnectionAction::Connect(_)));
        assert_eq!(conn.state(), ConnectionState::ConnectPending);
    }

    #[test]
    fn heartbeat_timeout_marks_for_destruction() {
        let t0 = Instant::now();
        let mut conn = Connection::new(addr(), identity(), ConnectionConfig::default(), t0);
        conn.start();
        conn.on_tcp_connected(t0);
        conn.on_bytes_received(&encode_connect_reply(ConnectStatusCode::Ok), t0)
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Heartbeat);

        let actions = conn.tick(t0 + Duration::from_millis(15_000));
        assert!(matches!(actions[0], ConnectionAction::Closed { reason: None }));
        assert_eq!(conn.state(), ConnectionState::MarkedForDestruction);
    }

    #[test]
    fn disconnect_pdu_from_peer_is_terminal() {
        let t0 = Instant::now();
        let mut conn = Connection::new(addr(), identity(), ConnectionConfig::default(), t0);
        conn.start();
        conn.on_tcp_connected(t0);
        conn.on_bytes_received(&encode_connect_reply(ConnectStatusCode::Ok), t0)
            .unwrap();

        let disconnect = encode_disconnect_pdu(DisconnectReason::ShuttingDown);
        let actions = conn.on_bytes_received(&disconnect, t0).unwrap();
        assert!(matches!(
            actions[0],
            ConnectionAction::Closed {
                reason: Some(DisconnectReason::ShuttingDown)
            }
        ));
        assert_eq!(conn.state(), ConnectionState::MarkedForDestruction);
    }

    fn encode_connect_reply(code: ConnectStatusCode) -> Vec<u8> {
        let root = RootPdu {
            sender_cid: Cid::new([2; 16]),
            vector: RootVector::Broker(vec![BrokerPdu::ConnectReply {
                code,
                e133_version: 1,
                broker_cid: Cid::new([2; 16]),
                broker_uid: Uid::new(0x6574, 100),
            }]),
        };
        let mut buf = vec![0u8; 256];
        let written = {
            let mut cur = CursorMut::new(&mut buf);
            root.pack(&mut cur).unwrap();
            cur.offset()
        };
        buf.truncate(written);
        buf
    }

    fn encode_disconnect_pdu(reason: DisconnectReason) -> Vec<u8> {
        let root = RootPdu {
            sender_cid: Cid::new([2; 16]),
            vector: RootVector::Broker(vec![BrokerPdu::Disconnect { reason }]),
        };
        let mut buf = vec![0u8; 64];
        let written = {
            let mut cur = CursorMut::new(&mut buf);
            root.pack(&mut cur).unwrap();
            cur.offset()
        };
        buf.truncate(written);
        buf
    }
}
