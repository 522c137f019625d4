// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Top-level broker: one acceptor per listen address plus a main tick task
//! that drives the destruction sweep (`spec.md` §4.6 "Broker listener",
//! §5 "main tick").
//!
//! Grounded in the teacher's `DiscoveryServer`: `new`/`run`/`shutdown`
//! structure, a `Notify` for cooperative shutdown, and an `AtomicBool`
//! guarding against a second `run()` call. Unlike the teacher, which binds
//! exactly one `TcpListener`, `spec.md` §4.6 calls for one acceptor per
//! configured listen address, so `run()` spawns an accept loop per address
//! rather than a single `listener.accept()` loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rdmnet_core::ids::{Cid, Scope, Uid};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::connection::handle_connection;
use crate::error::{BrokerError, Result};
use crate::routing::RoutingEngine;

/// Generates the broker's own CID once at startup; stable for the process
/// lifetime, reported in every `ConnectReply`.
fn generate_broker_cid() -> Cid {
    // Not a random UUID generator (this crate has no randomness dependency);
    // derived from the process start time, which is unique enough for a
    // single running broker instance to identify itself consistently.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut bytes = [0u8; 16];
    bytes[..16].copy_from_slice(&nanos.to_be_bytes());
    Cid::new(bytes)
}

#[derive(Clone)]
pub struct Broker {
    config: Arc<BrokerConfig>,
    routing: Arc<Mutex<RoutingEngine>>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    broker_cid: Cid,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        let scope = Scope::new(config.scope.clone())
            .map_err(|e| BrokerError::Config(e.to_string()))?;
        let broker_cid = generate_broker_cid();
        let broker_uid = Uid::new(0x6574, 0);

        Ok(Self {
            routing: Arc::new(Mutex::new(RoutingEngine::new(
                scope,
                config.max_controllers,
                config.max_devices,
                broker_cid,
                broker_uid,
            ))),
            config: Arc::new(config),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            broker_cid,
        })
    }

    /// Bind every configured listen address and run until `shutdown()` is
    /// called or every acceptor task exits.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyRunning);
        }

        let addrs = self.config.socket_addrs();
        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in &addrs {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| BrokerError::Bind(format!("{addr}: {e}")))?;
            info!(%addr, "broker listening");
            listeners.push(listener);
        }

        self.spawn_main_tick();

        let mut accept_tasks = Vec::with_capacity(listeners.len());
        for listener in listeners {
            accept_tasks.push(self.spawn_acceptor(listener));
        }

        for task in accept_tasks {
            let _ = task.await;
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_acceptor(&self, listener: TcpListener) -> tokio::task::JoinHandle<()> {
        let routing = self.routing.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        let broker_cid = self.broker_cid;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let routing = routing.clone();
                                let config = config.clone();
                                let shutdown = shutdown.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, peer_addr, broker_cid, routing, config, shutdown).await;
                                });
                            }
                            Err(e) => {
                                error!(error = %e, "accept error");
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        debug!("acceptor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// `spec.md` §5's main tick: housekeeping only (destruction sweep).
    /// Discovery is out of scope for the broker side (`spec.md` §1's
    /// "DNS-SD server-side registration" non-goal), so there is no mDNS
    /// announce step here.
    fn spawn_main_tick(&self) {
        let routing = self.routing.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.config.main_tick_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut r = routing.lock().await;
                        let removals = r.sweep();
                        drop(r);
                        if !removals.is_empty() {
                            debug!(count = removals.len(), "destruction sweep broadcast ClientRemove");
                        }
                        for (handle, msg) in removals {
                            let sender = {
                                let r = routing.lock().await;
                                r.registry.get(handle).map(|rec| rec.outbound.clone())
                            };
                            if let Some(sender) = sender {
                                if sender.send(msg).await.is_err() {
                                    warn!(?handle, "failed to deliver ClientRemove, peer queue gone");
                                }
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        debug!("main tick shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// `spec.md` §6 `Shutdown()`: notify every waiting task. Connection
    /// tasks answer by sending `Disconnect(ShuttingDown)` to their peer and
    /// closing (`connection::handle_connection`'s shutdown branch).
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn controller_count(&self) -> usize {
        self.routing.lock().await.registry.controller_count()
    }

    pub async fn device_count(&self) -> usize {
        self.routing.lock().await.registry.device_count()
    }
}
