use std::path::Path;
use std::sync::Arc;

use secp256k1::{KeyPair, XOnlyPublicKey};
use strum_macros::{Display, IntoStaticStr};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::sleep,
};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::collaborator::{
    transport::PeerTransport,
    wallet::WalletAccess,
    witness::{BlockchainWitness, ConfidenceEvent},
};
use crate::common::{
    error::SwapError,
    types::{EngineConfig, SerdeGenericTrait, TxIdString},
};
use crate::message::MessageEnvelope;
use crate::offer::{Offer, RegistryAccess};

use super::data::TradeData;
use super::state::{TradeRole, TradeState};

/// Everything a trade actor borrows from its node. Cloned per spawned trade.
#[derive(Clone)]
pub(crate) struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) keypair: KeyPair,
    pub(crate) own_address: Url,
    pub(crate) account_id: String,
    pub(crate) payment_details: Box<dyn SerdeGenericTrait>,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) wallet: WalletAccess,
    pub(crate) witness: Arc<dyn BlockchainWitness>,
    pub(crate) registry: RegistryAccess,
}

/// Pushed to whoever registered interest in a trade. `StateChanged` fires on
/// every transition; the rest carry detail a UI needs beyond the state name.
#[derive(Clone, Debug)]
pub enum TradeNotif {
    StateChanged(TradeState),
    DepositDepthChanged(u32),
    Failed(String),
    Disputed(String),
}

/// Snapshot of a trade for higher layers.
#[derive(Clone, Debug)]
pub struct TradeSummary {
    pub trade_uuid: Uuid,
    pub role: TradeRole,
    pub state: TradeState,
    pub progress_pct: u8,
    pub trade_amount_sat: u64,
    pub trade_price: u64,
    pub deposit_depth: u32,
    pub deposit_tx_id: Option<TxIdString>,
    pub payout_tx_id: Option<TxIdString>,
    pub fail_reason: Option<String>,
}

#[derive(Clone)]
pub struct TradeAccess {
    tx: mpsc::Sender<TradeRequest>,
}

impl TradeAccess {
    pub(crate) fn new(tx: mpsc::Sender<TradeRequest>) -> Self {
        Self { tx }
    }

    /// Valid only for the fiat-paying side with the deposit confirmed.
    pub async fn confirm_fiat_sent(&self) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = TradeRequest::ConfirmFiatSent { rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    /// Valid only for the fiat-receiving side after the peer reported the
    /// transfer initiated.
    pub async fn confirm_fiat_received(&self) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = TradeRequest::ConfirmFiatReceived { rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn open_dispute(&self, reason: impl Into<String>) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = TradeRequest::OpenDispute {
            reason: reason.into(),
            rsp_tx,
        };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn state(&self) -> TradeState {
        let (rsp_tx, rsp_rx) = oneshot::channel::<TradeState>();
        let request = TradeRequest::QueryState { rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn summary(&self) -> TradeSummary {
        let (rsp_tx, rsp_rx) = oneshot::channel::<TradeSummary>();
        let request = TradeRequest::QuerySummary { rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn register_notif_tx(&self, tx: mpsc::Sender<TradeNotif>) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = TradeRequest::RegisterNotifTx { tx, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn unregister_notif_tx(&self) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = TradeRequest::UnregisterNotifTx { rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn shutdown(&self) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), SwapError>>();
        let request = TradeRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        rsp_rx.await?
    }
}

#[derive(Display, IntoStaticStr)]
pub(crate) enum TradeRequest {
    ConfirmFiatSent {
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    ConfirmFiatReceived {
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    OpenDispute {
        reason: String,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    QueryState {
        rsp_tx: oneshot::Sender<TradeState>,
    },
    QuerySummary {
        rsp_tx: oneshot::Sender<TradeSummary>,
    },
    RegisterNotifTx {
        tx: mpsc::Sender<TradeNotif>,
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    UnregisterNotifTx {
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<Result<(), SwapError>>,
    },

    // Internal requests looped back from spawned timers and watchers. Each
    // carries the nonce that armed it; a mismatch means the awaited event
    // already happened and the request is stale.
    PeerTimeout {
        nonce: Uuid,
        waiting_for: String,
    },
    FeeCheckTick {
        nonce: Uuid,
    },
    SendFault {
        description: String,
    },
}

/// One running trade. The engine spawns the actor; the Manager keeps the
/// engine, everything else talks through `TradeAccess` handles.
pub struct TradeEngine {
    pub(crate) trade_uuid: Uuid,
    tx: mpsc::Sender<TradeRequest>,
    pub(crate) task_handle: tokio::task::JoinHandle<()>,
}

impl TradeEngine {
    const TRADE_REQUEST_CHANNEL_SIZE: usize = 10;
    const TRADE_MESSAGE_CHANNEL_SIZE: usize = 10;
    const CONFIDENCE_CHANNEL_SIZE: usize = 10;

    /// Maker side, spawned when a taker wins the reservation on our offer.
    pub(crate) fn start_maker(
        offer: Offer,
        taker_address: Url,
        context: EngineContext,
        data_dir: impl AsRef<Path>,
    ) -> Self {
        let data = TradeData::new(
            TradeRole::Maker,
            offer,
            TradeState::Init,
            taker_address,
            data_dir,
        );
        Self::spawn(data, context, false)
    }

    /// Taker side, spawned after the offer availability round trip succeeded.
    pub(crate) fn start_taker(
        offer: Offer,
        trade_amount_sat: u64,
        trade_price: u64,
        context: EngineContext,
        data_dir: impl AsRef<Path>,
    ) -> Self {
        let maker_address = offer.maker_address.clone();
        let data = TradeData::new(
            TradeRole::Taker,
            offer,
            TradeState::AvailabilityChecked,
            maker_address,
            data_dir,
        );
        data.set_trade_terms(trade_amount_sat, trade_price);
        Self::spawn(data, context, false)
    }

    /// Rehydrates a trade from its persisted record after a restart.
    pub(crate) fn resume(
        data_path: impl AsRef<Path>,
        context: EngineContext,
    ) -> Result<Self, SwapError> {
        let data = TradeData::restore(data_path)?;
        Ok(Self::spawn(data, context, true))
    }

    fn spawn(data: TradeData, context: EngineContext, resumed: bool) -> Self {
        let trade_uuid = data.trade_uuid;
        let (tx, rx) = mpsc::channel::<TradeRequest>(Self::TRADE_REQUEST_CHANNEL_SIZE);
        let (msg_tx, msg_rx) = mpsc::channel::<MessageEnvelope>(Self::TRADE_MESSAGE_CHANNEL_SIZE);
        let (confidence_tx, confidence_rx) =
            mpsc::channel::<ConfidenceEvent>(Self::CONFIDENCE_CHANNEL_SIZE);

        context.transport.register_trade_tx(trade_uuid, msg_tx);

        let actor = TradeActor {
            rx,
            self_tx: tx.clone(),
            msg_rx,
            confidence_rx,
            confidence_tx,
            data,
            context,
            notif_tx: None,
            timeout_nonce: None,
            fee_poll_nonce: None,
        };
        let task_handle = tokio::spawn(async move { actor.run(resumed).await });

        Self {
            trade_uuid,
            tx,
            task_handle,
        }
    }

    pub fn new_accessor(&self) -> TradeAccess {
        TradeAccess::new(self.tx.clone())
    }
}

pub(super) struct TradeActor {
    rx: mpsc::Receiver<TradeRequest>,
    pub(super) self_tx: mpsc::Sender<TradeRequest>,
    msg_rx: mpsc::Receiver<MessageEnvelope>,
    confidence_rx: mpsc::Receiver<ConfidenceEvent>,
    pub(super) confidence_tx: mpsc::Sender<ConfidenceEvent>,
    pub(super) data: TradeData,
    pub(super) context: EngineContext,
    notif_tx: Option<mpsc::Sender<TradeNotif>>,
    pub(super) timeout_nonce: Option<Uuid>,
    pub(super) fee_poll_nonce: Option<Uuid>,
}

impl TradeActor {
    async fn run(mut self, resumed: bool) {
        if resumed {
            self.on_resume().await;
        } else {
            self.on_start().await;
        }

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
                Some(event) = self.confidence_rx.recv() => {
                    self.handle_confidence_event(event).await;
                },
                else => break,
            }
        }

        let trade_uuid = self.data.trade_uuid;
        self.context.transport.unregister_trade_tx(trade_uuid);
        if let Some(deposit_tx_id) = self.data.deposit_tx_id() {
            self.context.witness.unsubscribe_confidence(&deposit_tx_id);
        }
        self.data.terminate();
        info!("Trade w/ TradeUUID {} terminating", trade_uuid);
    }

    async fn handle_request(&mut self, request: TradeRequest) -> bool {
        debug!(
            "Trade w/ TradeUUID {} handle_request() of type {}",
            self.data.trade_uuid, request
        );

        match request {
            TradeRequest::ConfirmFiatSent { rsp_tx } => {
                let result = self.confirm_fiat_sent().await;
                rsp_tx.send(result).unwrap(); // oneshot should not fail
            }
            TradeRequest::ConfirmFiatReceived { rsp_tx } => {
                let result = self.confirm_fiat_received().await;
                rsp_tx.send(result).unwrap(); // oneshot should not fail
            }
            TradeRequest::OpenDispute { reason, rsp_tx } => {
                let result = self.open_dispute(reason).await;
                rsp_tx.send(result).unwrap(); // oneshot should not fail
            }
            TradeRequest::QueryState { rsp_tx } => {
                rsp_tx.send(self.data.state()).unwrap(); // oneshot should not fail
            }
            TradeRequest::QuerySummary { rsp_tx } => {
                rsp_tx.send(self.summary()).unwrap(); // oneshot should not fail
            }
            TradeRequest::RegisterNotifTx { tx, rsp_tx } => {
                let mut result = Ok(());
                if self.notif_tx.is_some() {
                    result = Err(SwapError::Simple(format!(
                        "Trade w/ TradeUUID {} already have notif_tx registered",
                        self.data.trade_uuid
                    )));
                }
                self.notif_tx = Some(tx);
                rsp_tx.send(result).unwrap(); // oneshot should not fail
            }
            TradeRequest::UnregisterNotifTx { rsp_tx } => {
                let mut result = Ok(());
                if self.notif_tx.is_none() {
                    result = Err(SwapError::Simple(format!(
                        "Trade w/ TradeUUID {} does not have notif_tx registered",
                        self.data.trade_uuid
                    )));
                }
                self.notif_tx = None;
                rsp_tx.send(result).unwrap(); // oneshot should not fail
            }
            TradeRequest::Shutdown { rsp_tx } => {
                rsp_tx.send(Ok(())).unwrap(); // oneshot should not fail
                return true;
            }
            TradeRequest::PeerTimeout { nonce, waiting_for } => {
                self.peer_timeout(nonce, waiting_for).await;
            }
            TradeRequest::FeeCheckTick { nonce } => {
                self.fee_check_tick(nonce).await;
            }
            TradeRequest::SendFault { description } => {
                if !self.data.state().is_terminal() {
                    self.fail_trade(format!("Peer send failed - {}", description))
                        .await;
                }
            }
        }
        false
    }

    fn summary(&self) -> TradeSummary {
        let state = self.data.state();
        TradeSummary {
            trade_uuid: self.data.trade_uuid,
            role: self.data.role(),
            state,
            progress_pct: state.progress_pct(),
            trade_amount_sat: self.data.trade_amount_sat(),
            trade_price: self.data.trade_price(),
            deposit_depth: self.data.deposit_depth(),
            deposit_tx_id: self.data.deposit_tx_id(),
            payout_tx_id: self.data.payout_tx_id(),
            fail_reason: self.data.fail_reason(),
        }
    }

    // Shared plumbing used by the protocol handlers

    pub(super) fn my_msg_pubkey(&self) -> XOnlyPublicKey {
        XOnlyPublicKey::from_keypair(&self.context.keypair).0
    }

    pub(super) async fn notify(&self, notif: TradeNotif) {
        if let Some(tx) = &self.notif_tx {
            if let Some(error) = tx.send(notif).await.err() {
                error!(
                    "Trade w/ TradeUUID {} failed in notifying - {}",
                    self.data.trade_uuid, error
                );
            }
        } else {
            warn!(
                "Trade w/ TradeUUID {} does not have notif_tx registered",
                self.data.trade_uuid
            );
        }
    }

    pub(super) async fn transition(&mut self, state: TradeState) {
        info!(
            "Trade w/ TradeUUID {} transitioning {} -> {}",
            self.data.trade_uuid,
            self.data.state(),
            state
        );
        self.data.set_state(state);
        self.notify(TradeNotif::StateChanged(state)).await;
    }

    /// Arms the single outstanding peer-response deadline. Re-arming
    /// invalidates any previous timer through the nonce.
    pub(super) fn arm_timeout(&mut self, waiting_for: &str) {
        let nonce = Uuid::new_v4();
        self.timeout_nonce = Some(nonce);
        let tx = self.self_tx.clone();
        let timeout = self.context.config.request_timeout;
        let waiting_for = waiting_for.to_string();
        tokio::spawn(async move {
            sleep(timeout).await;
            let _ = tx
                .send(TradeRequest::PeerTimeout { nonce, waiting_for })
                .await;
        });
    }

    pub(super) fn disarm_timeout(&mut self) {
        self.timeout_nonce = None;
    }

    async fn peer_timeout(&mut self, nonce: Uuid, waiting_for: String) {
        if self.timeout_nonce != Some(nonce) {
            debug!(
                "Trade w/ TradeUUID {} stale peer timeout - no-op",
                self.data.trade_uuid
            );
            return;
        }
        self.timeout_nonce = None;
        self.peer_timeout_expired(waiting_for).await;
    }
}
