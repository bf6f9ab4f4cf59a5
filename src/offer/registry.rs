use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use secp256k1::XOnlyPublicKey;
use strum_macros::{Display, IntoStaticStr};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::sleep,
};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::collaborator::transport::{PeerTransport, TransportFault};
use crate::common::{error::SwapError, types::EngineConfig};
use crate::message::{MessageEnvelope, TradeMessage};

use super::{Offer, OfferStatus};

/// Pushed to the Manager when a Taker wins the reservation on one of our
/// published offers, so a Maker-side trade actor can be spawned.
#[derive(Clone, Debug)]
pub enum RegistryNotif {
    OfferReserved {
        offer: Offer,
        taker_address: Url,
        taker_pubkey: XOnlyPublicKey,
    },
}

#[derive(Clone)]
pub struct RegistryAccess {
    tx: mpsc::Sender<RegistryRequest>,
}

impl RegistryAccess {
    pub(super) fn new(tx: mpsc::Sender<RegistryRequest>) -> Self {
        Self { tx }
    }

    pub async fn publish_offer(&self, offer: Offer) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = RegistryRequest::PublishOffer { offer, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    /// Offers currently advertised to takers. Reserved and closed offers are
    /// atomically removed from this view the moment a reservation lands.
    pub async fn advertised_offers(&self) -> Vec<Offer> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Vec<Offer>>();
        let request = RegistryRequest::AdvertisedOffers { rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn offer_status(&self, offer_uuid: Uuid) -> Option<OfferStatus> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Option<OfferStatus>>();
        let request = RegistryRequest::QueryOfferStatus { offer_uuid, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    /// Taker side: ask the Maker whether the offer is still available. The
    /// returned future resolves when exactly one of response, timeout or
    /// cancellation wins inside the registry actor.
    pub async fn check_availability(
        &self,
        offer: Offer,
        taker_pubkey: XOnlyPublicKey,
    ) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = RegistryRequest::CheckAvailability {
            offer,
            taker_pubkey,
            rsp_tx,
        };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    /// Aborts an in-flight availability check. Idempotent; a no-op if the
    /// response or timeout already won the race.
    pub async fn cancel_availability_check(&self, offer_uuid: Uuid) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = RegistryRequest::CancelAvailability { offer_uuid, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    /// Returns a reserved offer to the advertised book, e.g. after the
    /// reserving trade failed before any fund movement.
    pub async fn release_offer(&self, offer_uuid: Uuid) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = RegistryRequest::ReleaseOffer { offer_uuid, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn close_offer(&self, offer_uuid: Uuid) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = RegistryRequest::CloseOffer { offer_uuid, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn register_notif_tx(
        &self,
        tx: mpsc::Sender<RegistryNotif>,
    ) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = RegistryRequest::RegisterNotifTx { tx, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn shutdown(&self) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = RegistryRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        rsp_rx.await?
    }
}

pub struct OfferRegistry {
    tx: mpsc::Sender<RegistryRequest>,
    pub(crate) task_handle: tokio::task::JoinHandle<()>,
}

impl OfferRegistry {
    const REGISTRY_REQUEST_CHANNEL_SIZE: usize = 20;
    const REGISTRY_MESSAGE_CHANNEL_SIZE: usize = 20;

    pub fn new(
        transport: Arc<dyn PeerTransport>,
        own_address: Url,
        config: EngineConfig,
        banned_peers: Arc<RwLock<HashSet<Url>>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<RegistryRequest>(Self::REGISTRY_REQUEST_CHANNEL_SIZE);
        let actor = RegistryActor::new(rx, tx.clone(), transport, own_address, config, banned_peers);
        let task_handle = tokio::spawn(async move { actor.run().await });
        Self { tx, task_handle }
    }

    pub fn new_accessor(&self) -> RegistryAccess {
        RegistryAccess::new(self.tx.clone())
    }
}

#[derive(Display, IntoStaticStr)]
pub(crate) enum RegistryRequest {
    PublishOffer {
        offer: Offer,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    AdvertisedOffers {
        rsp_tx: oneshot::Sender<Vec<Offer>>,
    },
    QueryOfferStatus {
        offer_uuid: Uuid,
        rsp_tx: oneshot::Sender<Option<OfferStatus>>,
    },
    CheckAvailability {
        offer: Offer,
        taker_pubkey: XOnlyPublicKey,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    CancelAvailability {
        offer_uuid: Uuid,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    ReleaseOffer {
        offer_uuid: Uuid,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    CloseOffer {
        offer_uuid: Uuid,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    RegisterNotifTx {
        tx: mpsc::Sender<RegistryNotif>,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },

    // Internal requests looped back from spawned timers and send watchers,
    // so races against responses resolve serially in the actor mailbox.
    AvailabilityTimeout {
        offer_uuid: Uuid,
        nonce: Uuid,
    },
    AvailabilityFault {
        offer_uuid: Uuid,
        nonce: Uuid,
        fault: TransportFault,
    },
}

struct PendingCheck {
    nonce: Uuid,
    offer: Offer,
    rsp_tx: oneshot::Sender<Result<(), SwapError>>,
}

struct RegistryActor {
    rx: mpsc::Receiver<RegistryRequest>,
    self_tx: mpsc::Sender<RegistryRequest>,
    msg_tx: mpsc::Sender<MessageEnvelope>,
    msg_rx: mpsc::Receiver<MessageEnvelope>,
    transport: Arc<dyn PeerTransport>,
    own_address: Url,
    config: EngineConfig,
    banned_peers: Arc<RwLock<HashSet<Url>>>,
    published: HashMap<Uuid, (Offer, OfferStatus)>,
    pending_checks: HashMap<Uuid, PendingCheck>,
    notif_tx: Option<mpsc::Sender<RegistryNotif>>,
}

impl RegistryActor {
    fn new(
        rx: mpsc::Receiver<RegistryRequest>,
        self_tx: mpsc::Sender<RegistryRequest>,
        transport: Arc<dyn PeerTransport>,
        own_address: Url,
        config: EngineConfig,
        banned_peers: Arc<RwLock<HashSet<Url>>>,
    ) -> Self {
        let (msg_tx, msg_rx) =
            mpsc::channel::<MessageEnvelope>(OfferRegistry::REGISTRY_MESSAGE_CHANNEL_SIZE);
        Self {
            rx,
            self_tx,
            msg_tx,
            msg_rx,
            transport,
            own_address,
            config,
            banned_peers,
            published: HashMap::new(),
            pending_checks: HashMap::new(),
            notif_tx: None,
        }
    }

    async fn run(mut self) {
        loop {
            select! {
                Some(request) = self.rx.recv() => {
                    if self.handle_request(request).await {
                        break;
                    }
                },
                Some(envelope) = self.msg_rx.recv() => {
                    self.handle_peer_message(envelope).await;
                },
                else => break,
            }
        }
        info!("OfferRegistry terminating");
    }

    async fn handle_request(&mut self, request: RegistryRequest) -> bool {
        debug!("OfferRegistry handle_request() of type {}", request);

        match request {
            RegistryRequest::PublishOffer { offer, rsp_tx } => {
                self.publish_offer(offer, rsp_tx);
            }
            RegistryRequest::AdvertisedOffers { rsp_tx } => {
                let offers = self
                    .published
                    .values()
                    .filter(|(_, status)| *status == OfferStatus::Available)
                    .map(|(offer, _)| offer.clone())
                    .collect();
                rsp_tx.send(offers).unwrap(); // oneshot should not fail
            }
            RegistryRequest::QueryOfferStatus { offer_uuid, rsp_tx } => {
                let status = self.published.get(&offer_uuid).map(|(_, status)| *status);
                rsp_tx.send(status).unwrap(); // oneshot should not fail
            }
            RegistryRequest::CheckAvailability {
                offer,
                taker_pubkey,
                rsp_tx,
            } => {
                self.check_availability(offer, taker_pubkey, rsp_tx).await;
            }
            RegistryRequest::CancelAvailability { offer_uuid, rsp_tx } => {
                self.cancel_availability(offer_uuid);
                rsp_tx.send(Ok(())).unwrap(); // oneshot should not fail
            }
            RegistryRequest::ReleaseOffer { offer_uuid, rsp_tx } => {
                rsp_tx
                    .send(self.set_offer_status(offer_uuid, OfferStatus::Available))
                    .unwrap(); // oneshot should not fail
            }
            RegistryRequest::CloseOffer { offer_uuid, rsp_tx } => {
                let result = self.set_offer_status(offer_uuid, OfferStatus::Closed);
                self.transport.unregister_trade_tx(offer_uuid);
                rsp_tx.send(result).unwrap(); // oneshot should not fail
            }
            RegistryRequest::RegisterNotifTx { tx, rsp_tx } => {
                let mut result = Ok(());
                if self.notif_tx.is_some() {
                    result = Err(SwapError::Simple(
                        "OfferRegistry already have notif_tx registered".to_string(),
                    ));
                }
                self.notif_tx = Some(tx);
                rsp_tx.send(result).unwrap(); // oneshot should not fail
            }
            RegistryRequest::Shutdown { rsp_tx } => {
                rsp_tx.send(Ok(())).unwrap(); // oneshot should not fail
                return true;
            }
            RegistryRequest::AvailabilityTimeout { offer_uuid, nonce } => {
                self.availability_timeout(offer_uuid, nonce);
            }
            RegistryRequest::AvailabilityFault {
                offer_uuid,
                nonce,
                fault,
            } => {
                self.availability_fault(offer_uuid, nonce, fault);
            }
        }
        false
    }

    fn publish_offer(&mut self, offer: Offer, rsp_tx: oneshot::Sender<Result<(), SwapError>>) {
        let offer_uuid = offer.offer_uuid;
        if self.published.contains_key(&offer_uuid) {
            let error = SwapError::Simple(format!(
                "Offer w/ UUID {} already published",
                offer_uuid
            ));
            rsp_tx.send(Err(error)).unwrap(); // oneshot should not fail
            return;
        }

        self.transport
            .register_trade_tx(offer_uuid, self.msg_tx.clone());
        self.published
            .insert(offer_uuid, (offer, OfferStatus::Available));
        rsp_tx.send(Ok(())).unwrap(); // oneshot should not fail
    }

    fn set_offer_status(&mut self, offer_uuid: Uuid, status: OfferStatus) -> Result<(), SwapError> {
        match self.published.get_mut(&offer_uuid) {
            Some((_, current_status)) => {
                *current_status = status;
                Ok(())
            }
            None => Err(SwapError::Simple(format!(
                "Offer w/ UUID {} not found in registry",
                offer_uuid
            ))),
        }
    }

    // Taker side

    async fn check_availability(
        &mut self,
        offer: Offer,
        taker_pubkey: XOnlyPublicKey,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    ) {
        let offer_uuid = offer.offer_uuid;
        if self.pending_checks.contains_key(&offer_uuid) {
            let error = SwapError::Simple(format!(
                "Availability check for Offer {} already in flight",
                offer_uuid
            ));
            rsp_tx.send(Err(error)).unwrap(); // oneshot should not fail
            return;
        }

        let nonce = Uuid::new_v4();
        let envelope = MessageEnvelope {
            trade_uuid: offer_uuid,
            nonce: Some(nonce),
            sender: self.own_address.clone(),
            message: TradeMessage::AvailabilityRequest { taker_pubkey },
        };

        self.transport
            .register_trade_tx(offer_uuid, self.msg_tx.clone());
        let receipt_rx = self
            .transport
            .send_message(offer.maker_address.clone(), envelope);

        self.pending_checks.insert(
            offer_uuid,
            PendingCheck {
                nonce,
                offer,
                rsp_tx,
            },
        );

        // Send fault and timeout both loop back through the mailbox, so
        // whichever of fault/timeout/response lands first wins and the rest
        // are no-ops against the already-drained pending entry.
        let fault_tx = self.self_tx.clone();
        tokio::spawn(async move {
            if let Ok(Err(fault)) = receipt_rx.await {
                let _ = fault_tx
                    .send(RegistryRequest::AvailabilityFault {
                        offer_uuid,
                        nonce,
                        fault,
                    })
                    .await;
            }
        });

        let timeout_tx = self.self_tx.clone();
        let timeout = self.config.request_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let _ = timeout_tx
                .send(RegistryRequest::AvailabilityTimeout { offer_uuid, nonce })
                .await;
        });
    }

    fn cancel_availability(&mut self, offer_uuid: Uuid) {
        match self.pending_checks.remove(&offer_uuid) {
            Some(pending) => {
                self.transport.unregister_trade_tx(offer_uuid);
                let error = SwapError::OfferUnavailable(format!(
                    "Availability check for Offer {} cancelled by user",
                    offer_uuid
                ));
                pending.rsp_tx.send(Err(error)).unwrap(); // oneshot should not fail
            }
            None => {
                debug!(
                    "Cancel for Offer {} with no in-flight availability check - no-op",
                    offer_uuid
                );
            }
        }
    }

    fn availability_timeout(&mut self, offer_uuid: Uuid, nonce: Uuid) {
        let matches = self
            .pending_checks
            .get(&offer_uuid)
            .is_some_and(|pending| pending.nonce == nonce);
        if !matches {
            debug!(
                "Stale availability timeout for Offer {} - no-op",
                offer_uuid
            );
            return;
        }

        let pending = self.pending_checks.remove(&offer_uuid).unwrap();
        self.transport.unregister_trade_tx(offer_uuid);
        warn!(
            "Availability check for Offer {} timed out after {:?}",
            offer_uuid, self.config.request_timeout
        );
        let error = SwapError::Timeout(format!(
            "No availability response for Offer {} within {:?}",
            offer_uuid, self.config.request_timeout
        ));
        pending.rsp_tx.send(Err(error)).unwrap(); // oneshot should not fail
    }

    fn availability_fault(&mut self, offer_uuid: Uuid, nonce: Uuid, fault: TransportFault) {
        let matches = self
            .pending_checks
            .get(&offer_uuid)
            .is_some_and(|pending| pending.nonce == nonce);
        if !matches {
            debug!("Stale availability fault for Offer {} - no-op", offer_uuid);
            return;
        }

        let pending = self.pending_checks.remove(&offer_uuid).unwrap();
        self.transport.unregister_trade_tx(offer_uuid);

        if let TransportFault::PeerOffline(_) = fault {
            // Remember the maker as offline if this was one of our known offers
            let _ = self.set_offer_status(offer_uuid, OfferStatus::OffererOffline);
        }

        let error = SwapError::Transport(format!(
            "Availability request for Offer {} failed - {}",
            offer_uuid, fault
        ));
        pending.rsp_tx.send(Err(error)).unwrap(); // oneshot should not fail
    }

    // Bottom-up Peer Message Handling

    async fn handle_peer_message(&mut self, envelope: MessageEnvelope) {
        match &envelope.message {
            TradeMessage::AvailabilityRequest { taker_pubkey } => {
                let taker_pubkey = taker_pubkey.to_owned();
                self.handle_availability_request(envelope, taker_pubkey)
                    .await;
            }
            TradeMessage::AvailabilityResponse { available } => {
                let available = *available;
                self.handle_availability_response(envelope, available);
            }
            message => {
                warn!(
                    "OfferRegistry received unexpected {} message for Offer {} - dropped",
                    message, envelope.trade_uuid
                );
            }
        }
    }

    async fn handle_availability_request(
        &mut self,
        envelope: MessageEnvelope,
        taker_pubkey: XOnlyPublicKey,
    ) {
        let offer_uuid = envelope.trade_uuid;

        let banned = self.banned_peers.read().unwrap().contains(&envelope.sender);
        if banned {
            warn!(
                "AvailabilityRequest for Offer {} from banned peer {} - rejected",
                offer_uuid, envelope.sender
            );
        }

        // Check-and-set inside the actor mailbox. Concurrent takers race to
        // this point; exactly one sees Available and flips it to Reserved,
        // removing the offer from the advertised book in the same step.
        let (available, offer) = match self.published.get_mut(&offer_uuid) {
            Some(_) if banned => (false, None),
            Some((offer, status)) if *status == OfferStatus::Available => {
                *status = OfferStatus::Reserved;
                // Routing for this uuid is handed over to the trade actor the
                // Manager spawns. Until it registers, the transport mailboxes
                // anything the winning taker sends.
                self.transport.unregister_trade_tx(offer_uuid);
                (true, Some(offer.clone()))
            }
            Some((_, status)) => {
                debug!(
                    "AvailabilityRequest for Offer {} in status {} - rejected",
                    offer_uuid, status
                );
                (false, None)
            }
            None => {
                debug!(
                    "AvailabilityRequest for unknown Offer {} - rejected",
                    offer_uuid
                );
                (false, None)
            }
        };

        let response = MessageEnvelope {
            trade_uuid: offer_uuid,
            nonce: envelope.nonce,
            sender: self.own_address.clone(),
            message: TradeMessage::AvailabilityResponse { available },
        };
        let receipt_rx = self
            .transport
            .send_message(envelope.sender.clone(), response);
        tokio::spawn(async move {
            if let Ok(Err(fault)) = receipt_rx.await {
                error!(
                    "Failed to deliver availability response for Offer {} - {}",
                    offer_uuid, fault
                );
            }
        });

        if available {
            let offer = offer.unwrap();
            if let Some(tx) = &self.notif_tx {
                let notif = RegistryNotif::OfferReserved {
                    offer,
                    taker_address: envelope.sender,
                    taker_pubkey,
                };
                if let Some(error) = tx.send(notif).await.err() {
                    error!(
                        "OfferRegistry failed in notifying reservation of Offer {} - {}",
                        offer_uuid, error
                    );
                }
            } else {
                warn!("OfferRegistry does not have notif_tx registered");
            }
        }
    }

    fn handle_availability_response(&mut self, envelope: MessageEnvelope, available: bool) {
        let offer_uuid = envelope.trade_uuid;
        let matches = self
            .pending_checks
            .get(&offer_uuid)
            .is_some_and(|pending| Some(pending.nonce) == envelope.nonce);
        if !matches {
            warn!(
                "AvailabilityResponse for Offer {} with unknown or stale nonce - dropped",
                offer_uuid
            );
            return;
        }

        let pending = self.pending_checks.remove(&offer_uuid).unwrap();
        self.transport.unregister_trade_tx(offer_uuid);

        let result = if available {
            Ok(())
        } else {
            Err(SwapError::OfferUnavailable(format!(
                "Offer {} reported unavailable by Maker {}",
                offer_uuid, pending.offer.maker_address
            )))
        };
        pending.rsp_tx.send(result).unwrap(); // oneshot should not fail
    }
}
