use tokio::sync::mpsc;

use crate::common::types::TxIdString;

/// Pushed by the witness whenever the confidence of a watched transaction
/// changes. Depth keeps flowing after the first confirmation; the trade
/// actor republishes later depths to observers without re-transitioning.
#[derive(Clone, Debug)]
pub struct ConfidenceEvent {
    pub tx_id: TxIdString,
    pub depth: u32,
    pub broadcast_peers: u32,
}

/// Read-only view of the blockchain consumed by the engine.
///
/// `broadcast_peer_count` backs the take-offer fee check: the number of
/// network peers that have relayed the tx back to us. A lightweight
/// probabilistic double-spend signal, deliberately weaker than waiting for a
/// confirmation.
pub trait BlockchainWitness: Send + Sync + 'static {
    fn broadcast_peer_count(&self, tx_id: &str) -> u32;

    fn confirmation_depth(&self, tx_id: &str) -> u32;

    fn subscribe_confidence(&self, tx_id: &str, tx: mpsc::Sender<ConfidenceEvent>);

    fn unsubscribe_confidence(&self, tx_id: &str);
}
