// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-scope PTR query scheduling (`spec.md` §4.3), grounded in the original
//! lightweight stack's query-interval backoff: start at 1 second, multiply
//! by 3 after every query sent, capped at 6 minutes, reset whenever the
//! caller starts monitoring a scope.

use std::time::{Duration, Instant};

use crate::config::MdnsConfig;

/// Tracks when the next PTR query for one scope's `_rdmnet._tcp.<domain>`
/// service type is due.
#[derive(Clone, Debug)]
pub struct ScopeQuery {
    pub scope: String,
    interval: Duration,
    multiplier: u32,
    cap: Duration,
    next_due: Instant,
}

impl ScopeQuery {
    pub fn new(scope: impl Into<String>, cfg: &MdnsConfig, now: Instant) -> Self {
        Self {
            scope: scope.into(),
            interval: cfg.query_interval_start,
            multiplier: cfg.query_interval_multiplier,
            cap: cfg.query_interval_cap,
            next_due: now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Mark a query as sent: schedule the next one and grow the interval.
    pub fn mark_sent(&mut self, now: Instant) {
        self.next_due = now + self.interval;
        self.interval = (self.interval * self.multiplier).min(self.cap);
    }

    pub fn reset(&mut self, cfg: &MdnsConfig, now: Instant) {
        self.interval = cfg.query_interval_start;
        self.next_due = now;
    }
}

/// Schedules PTR queries across every scope currently being monitored.
#[derive(Debug, Default)]
pub struct QueryScheduler {
    scopes: Vec<ScopeQuery>,
}

impl QueryScheduler {
    pub fn new() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn monitor_scope(&mut self, scope: impl Into<String>, cfg: &MdnsConfig, now: Instant) {
        let scope = scope.into();
        if self.scopes.iter().any(|s| s.scope == scope) {
            return;
        }
        self.scopes.push(ScopeQuery::new(scope, cfg, now));
    }

    pub fn stop_monitoring(&mut self, scope: &str) {
        self.scopes.retain(|s| s.scope != scope);
    }

    /// Scopes due for a query right now; the caller builds and sends a PTR
    /// query per entry, then calls [`QueryScheduler::note_sent`].
    pub fn due_scopes(&self, now: Instant) -> Vec<String> {
        self.scopes
            .iter()
            .filter(|s| s.is_due(now))
            .map(|s| s.scope.clone())
            .collect()
    }

    pub fn note_sent(&mut self, scope: &str, now: Instant) {
        if let Some(s) = self.scopes.iter_mut().find(|s| s.scope == scope) {
            s.mark_sent(now);
        }
    }
}
