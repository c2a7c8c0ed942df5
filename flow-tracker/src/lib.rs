// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Per-flow accounting for the Geneve gateway.
//!
//! Flows are keyed by the balancer's flow cookie. Each record carries the
//! 5-tuple identity of its first packet, directional packet/byte counters,
//! and (for TCP) a connection state machine driven by the observed flags.
//! A background sweeper removes records which have been idle longer than
//! the configured flow timeout.

mod flow;

pub use flow::{Flow, FlowVerdict, TcpState};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use net::geneve::FlowCookie;
use net::packet::GenevePacket;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Tracker policy knobs.
#[derive(Debug, Clone)]
pub struct FlowTrackerConfig {
    /// Idle time after which the sweeper removes a flow; also the sweep
    /// period.
    pub flow_timeout: Duration,
    /// Discard new TCP flows whose first packet is not a clean SYN.
    pub tcp_nonsyn_block: bool,
    /// Remove a TCP flow as soon as it reaches CLOSED instead of leaving it
    /// to the sweeper.
    pub tcp_immediate_clean: bool,
}

impl Default for FlowTrackerConfig {
    fn default() -> Self {
        FlowTrackerConfig {
            flow_timeout: Duration::from_secs(120),
            tcp_nonsyn_block: false,
            tcp_immediate_clean: false,
        }
    }
}

/// The process-wide table of tracked flows.
///
/// A single mutex guards the whole table; both the receive loop (upserts)
/// and the sweeper (scan + delete) take it, and neither holds it across
/// I/O or sleeps.
#[derive(Debug)]
pub struct FlowTracker {
    flows: Mutex<HashMap<FlowCookie, Flow>>,
    config: FlowTrackerConfig,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl FlowTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new(config: FlowTrackerConfig) -> FlowTracker {
        info!("flow tracker initialized");
        FlowTracker {
            flows: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// The policy this tracker runs with.
    #[must_use]
    pub fn config(&self) -> &FlowTrackerConfig {
        &self.config
    }

    /// Upsert the flow for a parsed datagram.
    ///
    /// Datagrams without a flow cookie or without a parsed inner transport
    /// are logged and skipped; the caller still answers them.
    pub fn update(&self, packet: &GenevePacket) {
        self.update_at(packet, unix_now());
    }

    /// [`FlowTracker::update`] with an explicit clock, for tests.
    pub fn update_at(&self, packet: &GenevePacket, now: u64) {
        if packet.inner_l4().is_none() {
            debug!("not tracking datagram without a parsed inner transport");
            return;
        }
        let cookie = match packet.geneve().flow_cookie() {
            Ok(cookie) => cookie,
            Err(e) => {
                warn!("{e}; datagram not tracked");
                return;
            }
        };
        let mut flows = self.flows.lock();
        match flows.entry(cookie) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().update(packet, now, &self.config) == FlowVerdict::Drop {
                    let flow = entry.remove();
                    debug!("removed flow: {flow}");
                }
            }
            Entry::Vacant(entry) => {
                let (flow, verdict) = Flow::new(entry.key().clone(), packet, now, &self.config);
                match verdict {
                    FlowVerdict::Keep => {
                        entry.insert(flow);
                    }
                    FlowVerdict::Drop => debug!("discarding blocked flow: {flow}"),
                }
            }
        }
    }

    /// Remove a flow unconditionally; absent cookies are a no-op.
    pub fn delete(&self, cookie: &FlowCookie) {
        match self.flows.lock().remove(cookie) {
            Some(flow) => debug!("deleted flow: {flow}"),
            None => debug!("delete for unknown flow cookie {cookie}"),
        }
    }

    /// Remove every flow idle for longer than the flow timeout. Returns the
    /// number of removed records.
    pub fn sweep(&self) -> usize {
        self.sweep_at(unix_now())
    }

    /// [`FlowTracker::sweep`] with an explicit clock, for tests.
    pub fn sweep_at(&self, now: u64) -> usize {
        let deadline = now.saturating_sub(self.config.flow_timeout.as_secs());
        let mut flows = self.flows.lock();
        let before = flows.len();
        flows.retain(|_, flow| {
            let keep = flow.lastpacket_timestamp() >= deadline;
            if !keep {
                debug!("expiring idle flow: {flow}");
            }
            keep
        });
        before - flows.len()
    }

    /// The number of tracked flows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    /// Returns true if no flows are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flows.lock().is_empty()
    }

    /// Returns true if a record exists for the cookie.
    #[must_use]
    pub fn contains(&self, cookie: &FlowCookie) -> bool {
        self.flows.lock().contains_key(cookie)
    }

    /// Run a closure against the record for `cookie`, if present.
    pub fn with_flow<R>(&self, cookie: &FlowCookie, f: impl FnOnce(&Flow) -> R) -> Option<R> {
        self.flows.lock().get(cookie).map(f)
    }

    /// Start the background sweeper.
    ///
    /// The thread sweeps once per flow timeout; a message on (or the drop
    /// of) the shutdown channel ends it.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        shutdown: Receiver<()>,
    ) -> io::Result<thread::JoinHandle<()>> {
        let tracker = Arc::clone(self);
        thread::Builder::new()
            .name("flow-sweeper".to_string())
            .spawn(move || {
                info!("flow sweeper started");
                loop {
                    match shutdown.recv_timeout(tracker.config.flow_timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            let removed = tracker.sweep();
                            debug!("sweep removed {removed} idle flows");
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("flow sweeper stopped");
            })
    }
}
