use std::{error::Error, fmt};

use tokio::sync::{mpsc, oneshot};
use url::Url;
use uuid::Uuid;

use crate::message::MessageEnvelope;

/// What the transport reports for a send that went through: either the peer
/// acknowledged arrival, or the message was parked in a store-and-forward
/// mailbox for an offline peer.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum DeliveryReceipt {
    Arrived,
    StoredInMailbox,
}

#[derive(Clone, Debug)]
pub enum TransportFault {
    SendFailure(String),
    PeerOffline(Url),
}

impl Error for TransportFault {}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportFault::SendFailure(msg) => write!(f, "Transport send failure - {}", msg),
            TransportFault::PeerOffline(url) => write!(f, "Peer offline - {}", url),
        }
    }
}

/// Point-to-point messaging consumed by the engine. Implementations own the
/// wire format and delivery mechanics; the engine only sees typed envelopes.
///
/// Send results come back through the returned oneshot receiver instead of a
/// listener object, so suspension points and timeout races stay visible in
/// the type system. Inbound envelopes are routed per trade uuid through the
/// registered sender; registering again for the same uuid replaces the
/// previous sender (the offer registry hands routing over to the trade actor
/// this way once a trade starts).
pub trait PeerTransport: Send + Sync + 'static {
    fn send_message(
        &self,
        peer: Url,
        envelope: MessageEnvelope,
    ) -> oneshot::Receiver<Result<DeliveryReceipt, TransportFault>>;

    fn register_trade_tx(&self, trade_uuid: Uuid, tx: mpsc::Sender<MessageEnvelope>);

    fn unregister_trade_tx(&self, trade_uuid: Uuid);
}
