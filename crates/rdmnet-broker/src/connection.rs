// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection I/O task: one `tokio` task per accepted socket, owning
//! that connection's [`RecvBuffer`] and forwarding decoded messages to the
//! routing engine (`spec.md` §4.8).
//!
//! Grounded in the teacher's `handle_connection`/`ClientConnection`: a
//! `tokio::select!` loop between reading the socket and draining an
//! outbound `mpsc` channel, with cleanup on exit unregistering the
//! connection from the shared state. The wire format is different — binary
//! ACN/RPT framing through [`RecvBuffer`] instead of length-prefixed JSON —
//! but the task shape (own the stream, read loop, outbound queue, clean
//! teardown) is the same. Heartbeat liveness (`spec.md`'s "Heartbeat":
//! outgoing `Null` PDU on the send timer, incoming-silence deadline reset on
//! every read) is added as two more arms of the same `select!`.

use std::net::SocketAddr;
use std::sync::Arc;

use rdmnet_core::buffer::{ParseOutcome, RecvBuffer};
use rdmnet_core::codec::root::RootPdu;
use rdmnet_core::codec::{BrokerPdu, RdmnetMessage, RootVector};
use rdmnet_core::ids::Cid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use crate::client::OutboundMessage;
use crate::config::BrokerConfig;
use crate::registry::Handle;
use crate::routing::RoutingEngine;

const READ_CHUNK_SIZE: usize = 4096;
const ENCODE_BUF_START: usize = 4096;
const ENCODE_BUF_MAX: usize = 1 << 20;

/// Incoming silence is tolerated for twice the expected heartbeat period,
/// matching `spec.md`'s ~15s incoming-heartbeat timeout at the default 7.5s
/// outgoing interval.
const INCOMING_TIMEOUT_FACTOR: u32 = 2;

/// Runs for the lifetime of one accepted socket. Returns once the peer
/// disconnects, a protocol/transport error tears the connection down, or
/// `shutdown` fires.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    broker_cid: Cid,
    routing: Arc<Mutex<RoutingEngine>>,
    config: Arc<BrokerConfig>,
    shutdown: Arc<Notify>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(config.send_queue_depth);

    let handle = {
        let mut r = routing.lock().await;
        r.registry.insert_pending(outbound_tx)
    };
    debug!(?peer_addr, ?handle, "connection accepted");

    let mut recv = RecvBuffer::new(config.recv_buffer_capacity);
    let mut read_buf = vec![0u8; READ_CHUNK_SIZE];

    let heartbeat_period = config.heartbeat_interval();
    let incoming_timeout = heartbeat_period * INCOMING_TIMEOUT_FACTOR;
    let mut send_timer = tokio::time::interval(heartbeat_period);
    send_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let incoming_deadline = tokio::time::sleep(incoming_timeout);
    tokio::pin!(incoming_deadline);

    loop {
        tokio::select! {
            result = read_half.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!(?peer_addr, "peer closed connection");
                        break;
                    }
                    Ok(n) => {
                        incoming_deadline.as_mut().reset(TokioInstant::now() + incoming_timeout);
                        if recv.feed(&read_buf[..n]).is_err() {
                            warn!(?peer_addr, "receive buffer overflow, closing connection");
                            break;
                        }
                        if !process_available(&mut recv, &routing, handle, &mut write_half, broker_cid).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(?peer_addr, error = %e, "read error, closing connection");
                        break;
                    }
                }
            }
            msg = outbound_rx.recv() => {
                match msg {
                    Some(OutboundMessage::Close) | None => break,
                    Some(msg) => {
                        if !write_outbound(&mut write_half, broker_cid, msg).await {
                            break;
                        }
                    }
                }
            }
            _ = send_timer.tick() => {
                if !write_outbound(&mut write_half, broker_cid, OutboundMessage::Broker(BrokerPdu::Null)).await {
                    break;
                }
            }
            () = &mut incoming_deadline => {
                warn!(?peer_addr, "no traffic within heartbeat timeout, closing connection");
                break;
            }
            _ = shutdown.notified() => {
                let _ = write_outbound(
                    &mut write_half,
                    broker_cid,
                    OutboundMessage::Broker(BrokerPdu::Disconnect {
                        reason: rdmnet_core::codec::broker::DisconnectReason::ShuttingDown,
                    }),
                )
                .await;
                break;
            }
        }
    }

    let mut r = routing.lock().await;
    r.disconnect(handle);
    drop(r);
}

/// Pull every complete message currently buffered and dispatch it through
/// the routing engine, writing back whatever deliveries target this same
/// connection and forwarding the rest to their owners' outbound queues.
/// Returns `false` if the connection should close.
async fn process_available(
    recv: &mut RecvBuffer,
    routing: &Arc<Mutex<RoutingEngine>>,
    handle: Handle,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    broker_cid: Cid,
) -> bool {
    loop {
        match recv.try_parse() {
            Ok(ParseOutcome::Incomplete) => return true,
            Ok(ParseOutcome::SkippedBadBlock(e)) => {
                debug!(error = %e, "skipped malformed PDU block");
                continue;
            }
            Ok(ParseOutcome::Message(message)) => {
                if !dispatch_message(routing, handle, message, write_half, broker_cid).await {
                    return false;
                }
            }
            Err(e) => {
                warn!(error = %e, "unrecoverable parse error, closing connection");
                let _ = write_outbound(
                    write_half,
                    broker_cid,
                    OutboundMessage::Broker(BrokerPdu::Disconnect {
                        reason: rdmnet_core::codec::broker::DisconnectReason::SoftwareFault,
                    }),
                )
                .await;
                return false;
            }
        }
    }
}

async fn dispatch_message(
    routing: &Arc<Mutex<RoutingEngine>>,
    handle: Handle,
    message: RdmnetMessage,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    broker_cid: Cid,
) -> bool {
    let mut close_after = false;
    let deliveries = match message {
        RdmnetMessage::Broker(BrokerPdu::Connect {
            scope,
            client_entry,
            ..
        }) => {
            let mut r = routing.lock().await;
            let out = r.handle_connect(handle, &scope, client_entry);
            close_after = r.registry.is_marked_for_destruction(handle);
            out
        }
        RdmnetMessage::Broker(BrokerPdu::FetchClientList) => {
            let r = routing.lock().await;
            r.handle_fetch_client_list(handle)
        }
        RdmnetMessage::Rpt(pdu) => {
            let r = routing.lock().await;
            r.handle_rpt(handle, pdu)
        }
        RdmnetMessage::Broker(BrokerPdu::Disconnect { .. }) => {
            return false;
        }
        RdmnetMessage::Broker(BrokerPdu::Null) => {
            Vec::new()
        }
        RdmnetMessage::Broker(_other) => {
            debug!("client sent a broker-to-client-only PDU, treating as protocol error");
            let _ = write_outbound(
                write_half,
                broker_cid,
                OutboundMessage::Broker(BrokerPdu::Disconnect {
                    reason: rdmnet_core::codec::broker::DisconnectReason::SoftwareFault,
                }),
            )
            .await;
            return false;
        }
    };

    let delivered = deliver(routing, write_half, broker_cid, handle, deliveries).await;
    delivered && !close_after
}

/// Send each delivery: to this connection's own stream directly when it
/// targets `self_handle`, otherwise to the target's outbound queue (picked
/// up by that connection's own task).
async fn deliver(
    routing: &Arc<Mutex<RoutingEngine>>,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    broker_cid: Cid,
    self_handle: Handle,
    deliveries: Vec<(Handle, OutboundMessage)>,
) -> bool {
    for (target, msg) in deliveries {
        if target == self_handle {
            if !write_outbound(write_half, broker_cid, msg).await {
                return false;
            }
            continue;
        }
        let sender = {
            let r = routing.lock().await;
            r.registry.get(target).map(|rec| rec.outbound.clone())
        };
        if let Some(sender) = sender {
            if sender.send(msg).await.is_err() {
                debug!(?target, "outbound queue receiver already gone");
            }
        }
    }
    true
}

async fn write_outbound(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    broker_cid: Cid,
    msg: OutboundMessage,
) -> bool {
    let Some(bytes) = encode_outbound(broker_cid, msg) else {
        return true;
    };
    if let Err(e) = write_half.write_all(&bytes).await {
        warn!(error = %e, "write error, closing connection");
        return false;
    }
    write_half.flush().await.is_ok()
}

fn encode_outbound(sender_cid: Cid, msg: OutboundMessage) -> Option<Vec<u8>> {
    let vector = match msg {
        OutboundMessage::Broker(pdu) => RootVector::Broker(vec![pdu]),
        OutboundMessage::Rpt(pdu) => RootVector::Rpt(vec![pdu]),
        OutboundMessage::Close => return None,
    };
    let root = RootPdu {
        sender_cid,
        vector,
    };

    let mut size = ENCODE_BUF_START;
    loop {
        let mut buf = vec![0u8; size];
        let mut cursor = rdmnet_core::codec::cursor::CursorMut::new(&mut buf);
        match root.pack(&mut cursor) {
            Ok(()) => {
                let len = cursor.offset();
                buf.truncate(len);
                return Some(buf);
            }
            Err(rdmnet_core::error::Error::BufferTooSmall) if size < ENCODE_BUF_MAX => {
                size *= 2;
            }
            Err(e) => {
                warn!(error = %e, "failed to encode outbound PDU");
                return None;
            }
        }
    }
}
