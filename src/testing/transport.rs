use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, mpsc::error::TrySendError, oneshot};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::collaborator::transport::{DeliveryReceipt, PeerTransport, TransportFault};
use crate::message::MessageEnvelope;

#[derive(Default)]
struct NodeEndpoint {
    offline: bool,
    trade_txs: HashMap<Uuid, mpsc::Sender<MessageEnvelope>>,
    mailbox: HashMap<Uuid, Vec<MessageEnvelope>>,
}

/// Shared routing fabric for in-process nodes. Each node holds an
/// `InMemoryTransport` endpoint onto the same hub; sends resolve against the
/// receiving node's registrations. Messages for a trade uuid nobody has
/// registered yet are parked in a per-node mailbox and flushed on
/// registration, mimicking store-and-forward delivery.
#[derive(Default)]
pub struct InMemoryHub {
    nodes: Mutex<HashMap<Url, NodeEndpoint>>,
}

impl InMemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn endpoint(self: &Arc<Self>, own_address: Url) -> Arc<InMemoryTransport> {
        self.nodes
            .lock()
            .unwrap()
            .entry(own_address.clone())
            .or_default();
        Arc::new(InMemoryTransport {
            hub: self.clone(),
            own_address,
        })
    }

    pub fn set_offline(&self, address: &Url, offline: bool) {
        if let Some(endpoint) = self.nodes.lock().unwrap().get_mut(address) {
            endpoint.offline = offline;
        }
    }
}

pub struct InMemoryTransport {
    hub: Arc<InMemoryHub>,
    own_address: Url,
}

impl PeerTransport for InMemoryTransport {
    fn send_message(
        &self,
        peer: Url,
        envelope: MessageEnvelope,
    ) -> oneshot::Receiver<Result<DeliveryReceipt, TransportFault>> {
        let (rsp_tx, rsp_rx) = oneshot::channel();
        let mut nodes = self.hub.nodes.lock().unwrap();

        let result = match nodes.get_mut(&peer) {
            None => Err(TransportFault::PeerOffline(peer)),
            Some(endpoint) if endpoint.offline => Err(TransportFault::PeerOffline(peer)),
            Some(endpoint) => {
                let trade_uuid = envelope.trade_uuid;
                match endpoint.trade_txs.get(&trade_uuid) {
                    Some(trade_tx) => match trade_tx.try_send(envelope) {
                        Ok(()) => Ok(DeliveryReceipt::Arrived),
                        Err(TrySendError::Full(envelope))
                        | Err(TrySendError::Closed(envelope)) => {
                            warn!(
                                "Receiver for Trade {} at {} not accepting - mailboxed",
                                trade_uuid, peer
                            );
                            endpoint.mailbox.entry(trade_uuid).or_default().push(envelope);
                            Ok(DeliveryReceipt::StoredInMailbox)
                        }
                    },
                    None => {
                        debug!(
                            "No receiver for Trade {} at {} - mailboxed",
                            trade_uuid, peer
                        );
                        endpoint.mailbox.entry(trade_uuid).or_default().push(envelope);
                        Ok(DeliveryReceipt::StoredInMailbox)
                    }
                }
            }
        };
        rsp_tx.send(result).unwrap(); // oneshot should not fail
        rsp_rx
    }

    fn register_trade_tx(&self, trade_uuid: Uuid, tx: mpsc::Sender<MessageEnvelope>) {
        let mut nodes = self.hub.nodes.lock().unwrap();
        let endpoint = nodes.entry(self.own_address.clone()).or_default();
        if let Some(pending) = endpoint.mailbox.remove(&trade_uuid) {
            debug!(
                "Flushing {} mailboxed messages for Trade {} at {}",
                pending.len(),
                trade_uuid,
                self.own_address
            );
            for envelope in pending {
                if tx.try_send(envelope).is_err() {
                    warn!("Dropped mailboxed message for Trade {}", trade_uuid);
                }
            }
        }
        endpoint.trade_txs.insert(trade_uuid, tx);
    }

    fn unregister_trade_tx(&self, trade_uuid: Uuid) {
        let mut nodes = self.hub.nodes.lock().unwrap();
        if let Some(endpoint) = nodes.get_mut(&self.own_address) {
            endpoint.trade_txs.remove(&trade_uuid);
        }
    }
}
