//! The event pump and the waiter rendezvous.
//!
//! After login the session long-polls `/sc` with the latest server
//! sequence token. Deltas are applied to the graph discriminant-first;
//! unknown kinds are logged and kept raw. After each applied batch the
//! waiter generation advances, releasing anyone parked in
//! [`EventWaiters::wait`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mega_api::messages::Event;
use mega_api::Transport;
use mega_crypto::MasterKey;
use mega_fs::NodeGraph;

/// Cooperative rendezvous: register a generation token before submitting
/// an action, then wait; the wait resolves `true` iff any event batch
/// arrived after registration.
#[derive(Clone)]
pub struct EventWaiters {
    generation: Arc<watch::Sender<u64>>,
}

impl Default for EventWaiters {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWaiters {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0u64);
        Self {
            generation: Arc::new(tx),
        }
    }

    /// Current generation; pass it to [`wait`](Self::wait) later.
    pub fn register(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Advance the generation, releasing every parked waiter.
    pub fn fire(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Wait until any batch arrives after `token`, or `timeout` passes.
    /// Returns `true` iff an event arrived.
    pub async fn wait(&self, token: u64, timeout: Duration) -> bool {
        let mut rx = self.generation.subscribe();
        let arrived = async move {
            loop {
                if *rx.borrow_and_update() > token {
                    return;
                }
                if rx.changed().await.is_err() {
                    // sender gone: no event can ever arrive
                    futures::future::pending::<()>().await;
                }
            }
        };
        tokio::time::timeout(timeout, arrived).await.is_ok()
    }
}

/// Apply one batch of raw event objects; returns how many were applied.
pub(crate) fn apply_events(
    graph: &NodeGraph,
    master: &MasterKey,
    raw_events: &[serde_json::Value],
) -> usize {
    let mut applied = 0;
    for raw in raw_events {
        match Event::parse(raw) {
            Event::NewNodes(nodes) => {
                for node in &nodes {
                    if let Err(e) = graph.add_or_update(node, master) {
                        warn!(handle = %node.h, error = %e, "event node rejected");
                    }
                }
                applied += 1;
            }
            Event::AttrUpdate { handle, attr } => {
                if let Err(e) = graph.update_attr(&handle, &attr) {
                    debug!(handle, error = %e, "attribute event for unknown node");
                }
                applied += 1;
            }
            Event::Delete { handle } => {
                if let Err(e) = graph.remove(&handle) {
                    debug!(handle, error = %e, "delete event for unknown node");
                }
                applied += 1;
            }
            Event::Share { handle, key } => {
                match (handle, key) {
                    (Some(h), Some(k)) => {
                        if let Err(e) = graph.register_share_key(&h, &k, master) {
                            debug!(handle = %h, error = %e, "share key rejected");
                        }
                    }
                    _ => debug!("share event without key material"),
                }
                applied += 1;
            }
            Event::Unknown { kind, raw } => {
                debug!(kind, event = %raw, "ignoring event");
            }
        }
    }
    applied
}

/// Spawn the long-poll loop. It runs until cancelled; poll failures back
/// off for a second rather than spinning.
pub(crate) fn spawn_pump(
    transport: Arc<Transport>,
    graph: Arc<NodeGraph>,
    master: MasterKey,
    waiters: EventWaiters,
    initial_sn: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut server_sn = initial_sn;
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                result = transport.poll_events(&server_sn) => result,
            };
            match batch {
                Ok(batch) => {
                    if !batch.events.is_empty() {
                        let applied = apply_events(&graph, &master, &batch.events);
                        debug!(applied, total = batch.events.len(), "event batch applied");
                        waiters.fire();
                    }
                    if let Some(sn) = batch.sn {
                        server_sn = sn;
                    }
                    if let Some(wait_url) = batch.w {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            result = transport.wait_for_events(&wait_url) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "event wait failed");
                                    tokio::time::sleep(Duration::from_secs(1)).await;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "event poll failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!("event pump stopped");
    })
}
