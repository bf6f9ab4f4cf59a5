use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use crate::collaborator::witness::{BlockchainWitness, ConfidenceEvent};

#[derive(Default)]
struct WitnessInner {
    broadcast_peers: HashMap<String, u32>,
    depths: HashMap<String, u32>,
    subscribers: HashMap<String, Vec<mpsc::Sender<ConfidenceEvent>>>,
}

/// Hand-cranked chain view. Tests drive propagation and confirmation
/// explicitly; both sides of a trade share one instance so they observe the
/// same chain.
#[derive(Default)]
pub struct TestWitness {
    inner: Mutex<WitnessInner>,
}

impl TestWitness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_broadcast_peer_count(&self, tx_id: &str, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.broadcast_peers.insert(tx_id.to_string(), count);
    }

    /// Sets the confirmation depth of a tx and pushes the event to all
    /// confidence subscribers.
    pub fn confirm(&self, tx_id: &str, depth: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.depths.insert(tx_id.to_string(), depth);
        let broadcast_peers = inner.broadcast_peers.get(tx_id).copied().unwrap_or(0);
        if let Some(subscribers) = inner.subscribers.get(tx_id) {
            for subscriber in subscribers {
                let event = ConfidenceEvent {
                    tx_id: tx_id.to_string(),
                    depth,
                    broadcast_peers,
                };
                if subscriber.try_send(event).is_err() {
                    warn!("TestWitness dropped confidence event for {}", tx_id);
                }
            }
        }
    }
}

impl BlockchainWitness for TestWitness {
    fn broadcast_peer_count(&self, tx_id: &str) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.broadcast_peers.get(tx_id).copied().unwrap_or(0)
    }

    fn confirmation_depth(&self, tx_id: &str) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.depths.get(tx_id).copied().unwrap_or(0)
    }

    fn subscribe_confidence(&self, tx_id: &str, tx: mpsc::Sender<ConfidenceEvent>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .entry(tx_id.to_string())
            .or_default()
            .push(tx);
    }

    fn unsubscribe_confidence(&self, tx_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.remove(tx_id);
    }
}
