// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat (ACN `Null` PDU) timing, both directions (`spec.md` §4.6).

use std::time::{Duration, Instant};

/// Tracks when we last sent a heartbeat (so we know when to send the next
/// one) and when we last heard from the peer (so we know when to declare a
/// timeout).
#[derive(Clone, Debug)]
pub struct HeartbeatTracker {
    send_interval: Duration,
    timeout: Duration,
    last_sent: Instant,
    last_received: Instant,
}

impl HeartbeatTracker {
    pub fn new(send_interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            send_interval,
            timeout,
            last_sent: now,
            last_received: now,
        }
    }

    pub fn note_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Call on receipt of *any* PDU from the peer, not just `Null`; any
    /// traffic resets the incoming-heartbeat clock.
    pub fn note_received(&mut self, now: Instant) {
        self.last_received = now;
    }

    pub fn should_send(&self, now: Instant) -> bool {
        now.duration_since(self.last_sent) >= self.send_interval
    }

    pub fn has_timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.last_received) >= self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_send_after_interval() {
        let t0 = Instant::now();
        let hb = HeartbeatTracker::new(Duration::from_millis(7500), Duration::from_millis(15_000), t0);
        assert!(!hb.should_send(t0 + Duration::from_millis(1000)));
        assert!(hb.should_send(t0 + Duration::from_millis(7500)));
    }

    #[test]
    fn times_out_after_silence() {
        let t0 = Instant::now();
        let hb = HeartbeatTracker::new(Duration::from_millis(7500), Duration::from_millis(15_000), t0);
        assert!(!hb.has_timed_out(t0 + Duration::from_millis(14_999)));
        assert!(hb.has_timed_out(t0 + Duration::from_millis(15_000)));
    }

    #[test]
    fn receipt_resets_timeout_clock() {
        let t0 = Instant::now();
        let mut hb =
            HeartbeatTracker::new(Duration::from_millis(7500), Duration::from_millis(15_000), t0);
        let t1 = t0 + Duration::from_millis(10_000);
        hb.note_received(t1);
        assert!(!hb.has_timed_out(t1 + Duration::from_millis(10_000)));
    }
}
