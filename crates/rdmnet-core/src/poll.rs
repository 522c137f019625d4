// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded `mio::Poll` dispatch loop that drives one or more
//! [`Connection`] state machines end to end (`spec.md` §4.5).
//!
//! Grounded directly in `hdds::transport::tcp::io_thread::IoThread`: a
//! dedicated poll thread, `Token(0)`/`Token(1)` reserved for a listener and
//! a waker respectively, connection tokens starting at 2, an `IoCommand`
//! channel in and a `TcpEvent` channel out. Unlike the teacher's thread,
//! this one drives [`Connection`] (an RDMnet-specific state machine) rather
//! than raw framed bytes, and re-derives `tick()` calls from the poll
//! timeout rather than a separate timer thread.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::codec::broker::DisconnectReason;
use crate::codec::rpt::RptPdu;
use crate::codec::RdmnetMessage;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionAction, LocalIdentity};

const WAKER_TOKEN: Token = Token(1);
const CONNECTION_TOKEN_START: usize = 2;
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_EVENTS: usize = 128;

/// Commands sent into the dispatch loop from other threads.
pub enum PollCommand {
    Connect {
        conn_id: u64,
        remote_addr: SocketAddr,
        identity: LocalIdentity,
        cfg: ConnectionConfig,
    },
    SendRpt {
        conn_id: u64,
        pdu: RptPdu,
    },
    Disconnect {
        conn_id: u64,
        reason: DisconnectReason,
    },
    Shutdown,
}

/// Events the dispatch loop delivers back out.
#[derive(Debug)]
pub enum PollEvent {
    Connected { conn_id: u64, remote_addr: SocketAddr },
    MessageReceived { conn_id: u64, message: RdmnetMessage },
    Closed { conn_id: u64, reason: Option<DisconnectReason> },
    Error { conn_id: u64, error: String },
    Stopped,
}

/// Caller-facing handle: send commands, receive events, shut down.
pub struct PollHandle {
    cmd_tx: Sender<PollCommand>,
    event_rx: Receiver<PollEvent>,
    waker: Arc<Waker>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl PollHandle {
    pub fn connect(&self, conn_id: u64, remote_addr: SocketAddr, identity: LocalIdentity, cfg: ConnectionConfig) -> io::Result<()> {
        self.send(PollCommand::Connect {
            conn_id,
            remote_addr,
            identity,
            cfg,
        })
    }

    pub fn send_rpt(&self, conn_id: u64, pdu: RptPdu) -> io::Result<()> {
        self.send(PollCommand::SendRpt { conn_id, pdu })
    }

    pub fn disconnect(&self, conn_id: u64, reason: DisconnectReason) -> io::Result<()> {
        self.send(PollCommand::Disconnect { conn_id, reason })
    }

    fn send(&self, cmd: PollCommand) -> io::Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "dispatch loop stopped"))?;
        self.waker.wake()
    }

    pub fn try_recv(&self) -> Option<PollEvent> {
        match self.event_rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(PollEvent::Stopped),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<PollEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let _ = self.cmd_tx.send(PollCommand::Shutdown);
        let _ = self.waker.wake();
        if let Some(h) = self.thread_handle.take() {
            h.join().map_err(|_| io::Error::other("dispatch thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

struct DispatchedConnection {
    conn_id: u64,
    remote_addr: SocketAddr,
    machine: Connection,
    stream: Option<TcpStream>,
    send_queue: Vec<u8>,
    send_offset: usize,
}

/// The dispatch loop itself; construct with [`PollDispatcher::spawn`].
pub struct PollDispatcher {
    poll: Poll,
    connections: HashMap<Token, DispatchedConnection>,
    conn_id_to_token: HashMap<u64, Token>,
    next_token: usize,
    cmd_rx: Receiver<PollCommand>,
    event_tx: Sender<PollEvent>,
    running: Arc<AtomicBool>,
}

impl PollDispatcher {
    pub fn spawn() -> io::Result<PollHandle> {
        let poll = Poll::new()?;
        let (cmd_tx, cmd_rx) = channel();
        let (event_tx, event_rx) = channel();
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let running = Arc::new(AtomicBool::new(true));

        let dispatcher = Self {
            poll,
            connections: HashMap::new(),
            conn_id_to_token: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            cmd_rx,
            event_tx,
            running: running.clone(),
        };

        let thread_handle = thread::Builder::new()
            .name("rdmnet-poll".to_string())
            .spawn(move || dispatcher.run())?;

        Ok(PollHandle {
            cmd_tx,
            event_rx,
            waker,
            thread_handle: Some(thread_handle),
            running,
        })
    }

    fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);

        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(DEFAULT_POLL_TIMEOUT)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::warn!("rdmnet poll error: {e}");
                }
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => self.handle_commands(),
                    token => {
                        if event.is_readable() {
                            self.handle_readable(token);
                        }
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                    }
                }
            }

            self.tick_all();
        }

        for (_, conn) in self.connections.drain() {
            let _ = self.event_tx.send(PollEvent::Closed {
                conn_id: conn.conn_id,
                reason: None,
            });
        }
        let _ = self.event_tx.send(PollEvent::Stopped);
    }

    fn handle_commands(&mut self) {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(PollCommand::Connect {
                    conn_id,
                    remote_addr,
                    identity,
                    cfg,
                }) => self.handle_connect(conn_id, remote_addr, identity, cfg),
                Ok(PollCommand::SendRpt { conn_id, pdu }) => self.handle_send_rpt(conn_id, pdu),
                Ok(PollCommand::Disconnect { conn_id, reason }) => self.handle_disconnect(conn_id, reason),
                Ok(PollCommand::Shutdown) => {
                    self.running.store(false, Ordering::Relaxed);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }

    fn handle_connect(&mut self, conn_id: u64, remote_addr: SocketAddr, identity: LocalIdentity, cfg: ConnectionConfig) {
        let now = Instant::now();
        let mut machine = Connection::new(remote_addr, identity, cfg, now);
        let actions = machine.start();

        let token = Token(self.next_token);
        self.next_token += 1;

        let dispatched = DispatchedConnection {
            conn_id,
            remote_addr,
            machine,
            stream: None,
            send_queue: Vec::new(),
            send_offset: 0,
        };

        self.connections.insert(token, dispatched);
        self.conn_id_to_token.insert(conn_id, token);
        self.apply_actions(token, actions);
    }

    fn handle_send_rpt(&mut self, conn_id: u64, pdu: RptPdu) {
        let Some(&token) = self.conn_id_to_token.get(&conn_id) else {
            let _ = self.event_tx.send(PollEvent::Error {
                conn_id,
                error: "unknown connection".into(),
            });
            return;
        };
        let Some(conn) = self.connections.get(&token) else { return };
        let Some(bytes) = conn.machine.encode_rpt(pdu) else {
            let _ = self.event_tx.send(PollEvent::Error {
                conn_id,
                error: "connection not ready for application data".into(),
            });
            return;
        };
        self.apply_actions(token, vec![ConnectionAction::Send(bytes)]);
    }

    fn handle_disconnect(&mut self, conn_id: u64, reason: DisconnectReason) {
        let Some(&token) = self.conn_id_to_token.get(&conn_id) else { return };
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let actions = conn.machine.request_disconnect(reason);
        self.apply_actions(token, actions);
    }

    fn handle_readable(&mut self, token: Token) {
        let mut buf = [0u8; 4096];
        let mut received = Vec::new();
        let mut peer_closed = false;
        let mut io_error = false;

        if let Some(conn) = self.connections.get_mut(&token) {
            if let Some(stream) = conn.stream.as_mut() {
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) => {
                            peer_closed = true;
                            break;
                        }
                        Ok(n) => received.extend_from_slice(&buf[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => {
                            io_error = true;
                            break;
                        }
                    }
                }
            }
        }

        if peer_closed {
            self.close_connection(token, None);
            return;
        }
        if io_error {
            self.fail_connection(token);
            return;
        }
        if received.is_empty() {
            return;
        }

        let now = Instant::now();
        let outcome = self
            .connections
            .get_mut(&token)
            .map(|conn| conn.machine.on_bytes_received(&received, now));

        match outcome {
            Some(Ok(actions)) => self.apply_actions(token, actions),
            Some(Err(e)) => {
                let conn_id = self.connections.get(&token).map(|c| c.conn_id);
                if let Some(conn_id) = conn_id {
                    let _ = self.event_tx.send(PollEvent::Error {
                        conn_id,
                        error: e.to_string(),
                    });
                }
                self.close_connection(token, None);
            }
            None => {}
        }
    }

    fn handle_writable(&mut self, token: Token) {
        let is_connecting = self
            .connections
            .get(&token)
            .is_some_and(|c| c.stream.is_some() && c.send_offset == 0 && c.send_queue.is_empty());
        if is_connecting {
            let took_error = self
                .connections
                .get(&token)
                .and_then(|c| c.stream.as_ref())
                .and_then(|s| s.take_error().ok())
                .flatten();
            if let Some(_e) = took_error {
                self.fail_connection(token);
                return;
            }
            let now = Instant::now();
            if let Some(conn) = self.connections.get_mut(&token) {
                let remote_addr = conn.remote_addr;
                let conn_id = conn.conn_id;
                let actions = conn.machine.on_tcp_connected(now);
                let _ = self.event_tx.send(PollEvent::Connected { conn_id, remote_addr });
                self.apply_actions(token, actions);
            }
        }
        self.try_flush(token);
    }

    fn try_flush(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let Some(stream) = conn.stream.as_mut() else { return };
        if conn.send_queue.is_empty() {
            return;
        }
        while conn.send_offset < conn.send_queue.len() {
            match stream.write(&conn.send_queue[conn.send_offset..]) {
                Ok(0) => {
                    self.fail_connection(token);
                    return;
                }
                Ok(n) => conn.send_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.fail_connection(token);
                    return;
                }
            }
        }
        conn.send_queue.clear();
        conn.send_offset = 0;
    }

    fn tick_all(&mut self) {
        let now = Instant::now();
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            let Some(conn) = self.connections.get_mut(&token) else { continue };
            let actions = conn.machine.tick(now);
            self.apply_actions(token, actions);
        }
    }

    fn apply_actions(&mut self, token: Token, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Connect(addr) => self.begin_tcp_connect(token, addr),
                ConnectionAction::Send(bytes) => {
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.send_queue.extend_from_slice(&bytes);
                    }
                    self.try_flush(token);
                }
                ConnectionAction::WaitBackoff(_) => {
                    self.deregister_stream(token);
                }
                ConnectionAction::MessageReady(message) => {
                    if let Some(conn) = self.connections.get(&token) {
                        let _ = self.event_tx.send(PollEvent::MessageReceived {
                            conn_id: conn.conn_id,
                            message,
                        });
                    }
                }
                ConnectionAction::Closed { reason } => {
                    self.close_connection(token, reason);
                }
            }
        }
    }

    fn begin_tcp_connect(&mut self, token: Token, addr: SocketAddr) {
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                if let Err(e) = self
                    .poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                {
                    log::warn!("rdmnet poll: failed to register connect socket: {e}");
                    self.fail_connection(token);
                    return;
                }
                if let Some(conn) = self.connections.get_mut(&token) {
                    conn.stream = Some(stream);
                }
            }
            Err(e) => {
                log::debug!("rdmnet poll: connect() failed immediately: {e}");
                self.fail_connection(token);
            }
        }
    }

    fn deregister_stream(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            if let Some(mut stream) = conn.stream.take() {
                let _ = self.poll.registry().deregister(&mut stream);
            }
        }
    }

    fn fail_connection(&mut self, token: Token) {
        let now = Instant::now();
        let actions = self
            .connections
            .get_mut(&token)
            .map(|conn| conn.machine.on_io_error(now));
        if let Some(actions) = actions {
            self.deregister_stream(token);
            self.apply_actions(token, actions);
        }
    }

    fn close_connection(&mut self, token: Token, reason: Option<DisconnectReason>) {
        self.deregister_stream(token);
        if let Some(conn) = self.connections.remove(&token) {
            self.conn_id_to_token.remove(&conn.conn_id);
            let _ = self.event_tx.send(PollEvent::Closed {
                conn_id: conn.conn_id,
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_shutdown_cleanly() {
        let mut handle = PollDispatcher::spawn().expect("dispatcher should spawn");
        assert!(handle.is_running());
        handle.shutdown().expect("shutdown should join cleanly");
        assert!(!handle.is_running());
    }
}
