use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use iso_currency::Currency;
use secp256k1::{KeyPair, XOnlyPublicKey};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::collaborator::{
    transport::PeerTransport,
    wallet::{WalletGate, WalletOracle},
    witness::BlockchainWitness,
};
use crate::common::{
    error::{SwapError, TakeOfferRejectReason},
    types::{EngineConfig, FiatPaymentMethod, PriceSpec, SerdeGenericTrait},
};
use crate::offer::{Offer, OfferBuilder, OfferRegistry, RegistryAccess, RegistryNotif};
use crate::trade::{EngineContext, TradeAccess, TradeEngine, TradeSummary};

/// A configured fiat payment account. Trades can only be made against offers
/// whose method and currency this account serves.
#[derive(Clone, Debug)]
pub struct PaymentAccount {
    pub account_id: String,
    pub method: FiatPaymentMethod,
    pub currency: Currency,
    pub details: Box<dyn SerdeGenericTrait>,
}

/// Identity of this node: its messaging key, reachable address and payment
/// account. The keypair signs contracts; the transport collaborator may key
/// its own identity off the same material or not, that is its business.
#[derive(Clone)]
pub struct NodeProfile {
    pub keypair: KeyPair,
    pub address: Url,
    pub payment_account: Option<PaymentAccount>,
}

/// Top level of the engine. Owns the collaborators, the offer registry and
/// every running trade actor; everything underneath is reached through
/// accessor handles.
pub struct Manager {
    profile: NodeProfile,
    config: EngineConfig,
    transport: Arc<dyn PeerTransport>,
    wallet_gate: WalletGate,
    witness: Arc<dyn BlockchainWitness>,
    registry: OfferRegistry,
    registry_access: RegistryAccess,
    trade_engines: Arc<Mutex<HashMap<Uuid, TradeEngine>>>,
    data_dir: PathBuf,
    banned_currencies: RwLock<HashSet<Currency>>,
    banned_payment_methods: RwLock<HashSet<FiatPaymentMethod>>,
    banned_peers: Arc<RwLock<HashSet<Url>>>,
    reserved_loop_handle: tokio::task::JoinHandle<()>,
}

impl Manager {
    const RESERVED_NOTIF_CHANNEL_SIZE: usize = 10;

    pub async fn new(
        profile: NodeProfile,
        transport: Arc<dyn PeerTransport>,
        wallet_oracle: Box<dyn WalletOracle>,
        witness: Arc<dyn BlockchainWitness>,
        data_dir: impl AsRef<Path>,
        config: EngineConfig,
    ) -> Result<Self, SwapError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir).await?;

        let banned_peers = Arc::new(RwLock::new(HashSet::new()));
        let wallet_gate = WalletGate::new(wallet_oracle);
        let registry = OfferRegistry::new(
            transport.clone(),
            profile.address.clone(),
            config.clone(),
            banned_peers.clone(),
        );
        let registry_access = registry.new_accessor();

        let trade_engines = Arc::new(Mutex::new(HashMap::new()));

        let (notif_tx, notif_rx) =
            mpsc::channel::<RegistryNotif>(Self::RESERVED_NOTIF_CHANNEL_SIZE);
        registry_access.register_notif_tx(notif_tx).await?;

        // A node without a payment account can neither publish nor take, so
        // reservations can only ever arrive when a context exists.
        let context = profile.payment_account.as_ref().map(|account| EngineContext {
            config: config.clone(),
            keypair: profile.keypair,
            own_address: profile.address.clone(),
            account_id: account.account_id.clone(),
            payment_details: account.details.clone(),
            transport: transport.clone(),
            wallet: wallet_gate.new_accessor(),
            witness: witness.clone(),
            registry: registry_access.clone(),
        });
        let reserved_loop_handle = tokio::spawn(Self::reserved_offer_loop(
            notif_rx,
            trade_engines.clone(),
            context,
            data_dir.clone(),
        ));

        let manager = Self {
            profile,
            config,
            transport,
            wallet_gate,
            witness,
            registry,
            registry_access,
            trade_engines,
            data_dir,
            banned_currencies: RwLock::new(HashSet::new()),
            banned_payment_methods: RwLock::new(HashSet::new()),
            banned_peers,
            reserved_loop_handle,
        };
        manager.resume_trades().await?;
        Ok(manager)
    }

    pub fn msg_pubkey(&self) -> XOnlyPublicKey {
        XOnlyPublicKey::from_keypair(&self.profile.keypair).0
    }

    fn payment_account(&self) -> Result<&PaymentAccount, SwapError> {
        self.profile
            .payment_account
            .as_ref()
            .ok_or(SwapError::Rejected(TakeOfferRejectReason::NoPaymentAccount))
    }

    fn engine_context(&self) -> Result<EngineContext, SwapError> {
        let account = self.payment_account()?;
        Ok(EngineContext {
            config: self.config.clone(),
            keypair: self.profile.keypair,
            own_address: self.profile.address.clone(),
            account_id: account.account_id.clone(),
            payment_details: account.details.clone(),
            transport: self.transport.clone(),
            wallet: self.wallet_gate.new_accessor(),
            witness: self.witness.clone(),
            registry: self.registry_access.clone(),
        })
    }

    /// Rehydrates trades persisted by a previous run of this node.
    async fn resume_trades(&self) -> Result<(), SwapError> {
        if self.profile.payment_account.is_none() {
            return Ok(());
        }
        let mut engines = self.trade_engines.lock().await;
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            let is_trade_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with("-trade.json"));
            if !is_trade_record {
                continue;
            }
            let context = self.engine_context()?;
            match TradeEngine::resume(&path, context) {
                Ok(engine) => {
                    info!("Manager resumed Trade w/ TradeUUID {}", engine.trade_uuid);
                    engines.insert(engine.trade_uuid, engine);
                }
                Err(error) => {
                    error!(
                        "Manager failed in resuming trade record {} - {}",
                        path.display(),
                        error
                    );
                }
            }
        }
        Ok(())
    }

    async fn reserved_offer_loop(
        mut notif_rx: mpsc::Receiver<RegistryNotif>,
        trade_engines: Arc<Mutex<HashMap<Uuid, TradeEngine>>>,
        context: Option<EngineContext>,
        data_dir: PathBuf,
    ) {
        while let Some(notif) = notif_rx.recv().await {
            match notif {
                RegistryNotif::OfferReserved {
                    offer,
                    taker_address,
                    taker_pubkey: _,
                } => {
                    let Some(context) = context.as_ref() else {
                        warn!(
                            "Reservation of Offer {} without a payment account - ignored",
                            offer.offer_uuid
                        );
                        continue;
                    };
                    let trade_uuid = offer.offer_uuid;
                    let mut engines = trade_engines.lock().await;
                    if engines.contains_key(&trade_uuid) {
                        warn!(
                            "Manager already have Trade w/ TradeUUID {} - reservation ignored",
                            trade_uuid
                        );
                        continue;
                    }
                    info!(
                        "Manager spawning Maker side of Trade w/ TradeUUID {} for Taker {}",
                        trade_uuid, taker_address
                    );
                    let engine =
                        TradeEngine::start_maker(offer, taker_address, context.clone(), &data_dir);
                    engines.insert(trade_uuid, engine);
                }
            }
        }
    }

    // Offer side

    /// Builder prefilled with this node's identity fields.
    pub fn new_offer_builder(&self) -> OfferBuilder {
        let mut builder = OfferBuilder::new();
        builder
            .maker_address(self.profile.address.clone())
            .maker_msg_pubkey(self.msg_pubkey());
        builder
    }

    pub async fn publish_offer(&self, offer: Offer) -> Result<(), SwapError> {
        let account = self.payment_account()?;
        if offer.payment_method != account.method || offer.currency != account.currency {
            return Err(SwapError::Rejected(TakeOfferRejectReason::NoPaymentAccount));
        }
        if offer.maker_address != self.profile.address {
            return Err(SwapError::Simple(format!(
                "Offer maker address {} is not this node's address {}",
                offer.maker_address, self.profile.address
            )));
        }
        if offer.maker_msg_pubkey != self.msg_pubkey() {
            return Err(SwapError::Simple(
                "Offer maker pubkey is not this node's pubkey".to_string(),
            ));
        }
        self.registry_access.publish_offer(offer).await
    }

    pub async fn advertised_offers(&self) -> Vec<Offer> {
        self.registry_access.advertised_offers().await
    }

    pub async fn close_offer(&self, offer_uuid: Uuid) -> Result<(), SwapError> {
        self.registry_access.close_offer(offer_uuid).await
    }

    // Take side

    /// Local policy checks, run before any network traffic. Failures carry a
    /// structured rejection reason.
    fn validate_take(&self, offer: &Offer, trade_amount_sat: u64) -> Result<u64, SwapError> {
        let account = self.payment_account()?;
        if account.method != offer.payment_method || account.currency != offer.currency {
            return Err(SwapError::Rejected(TakeOfferRejectReason::NoPaymentAccount));
        }
        if self
            .banned_currencies
            .read()
            .unwrap()
            .contains(&offer.currency)
        {
            return Err(SwapError::Rejected(TakeOfferRejectReason::BannedCurrency));
        }
        if self
            .banned_payment_methods
            .read()
            .unwrap()
            .contains(&offer.payment_method)
        {
            return Err(SwapError::Rejected(
                TakeOfferRejectReason::BannedPaymentMethod,
            ));
        }
        if self
            .banned_peers
            .read()
            .unwrap()
            .contains(&offer.maker_address)
        {
            return Err(SwapError::Rejected(
                TakeOfferRejectReason::BannedNodeAddress,
            ));
        }
        offer
            .validate_take(trade_amount_sat)
            .map_err(SwapError::Rejected)?;

        match offer.price {
            PriceSpec::Fixed { price } => Ok(price),
            PriceSpec::MarketMargin { .. } => Err(SwapError::Simple(
                "Market margin offers require an external price source to take".to_string(),
            )),
        }
    }

    /// Takes an offer for the given amount. Returns once the Maker confirmed
    /// availability and the Taker side trade actor is running.
    pub async fn take_offer(
        &self,
        offer: Offer,
        trade_amount_sat: u64,
    ) -> Result<TradeAccess, SwapError> {
        let trade_price = self.validate_take(&offer, trade_amount_sat)?;
        let trade_uuid = offer.offer_uuid;

        {
            let engines = self.trade_engines.lock().await;
            if engines.contains_key(&trade_uuid) {
                return Err(SwapError::Rejected(
                    TakeOfferRejectReason::OfferAlreadyTaken,
                ));
            }
        }

        self.registry_access
            .check_availability(offer.clone(), self.msg_pubkey())
            .await?;

        let context = self.engine_context()?;
        let engine = TradeEngine::start_taker(
            offer,
            trade_amount_sat,
            trade_price,
            context,
            &self.data_dir,
        );
        let access = engine.new_accessor();

        let mut engines = self.trade_engines.lock().await;
        engines.insert(trade_uuid, engine);
        Ok(access)
    }

    /// Aborts a take attempt still waiting on the availability round trip.
    pub async fn cancel_take_offer(&self, offer_uuid: Uuid) -> Result<(), SwapError> {
        self.registry_access
            .cancel_availability_check(offer_uuid)
            .await
    }

    // Trade queries

    pub async fn trade_access(&self, trade_uuid: Uuid) -> Option<TradeAccess> {
        let engines = self.trade_engines.lock().await;
        engines.get(&trade_uuid).map(|engine| engine.new_accessor())
    }

    pub async fn trade_summaries(&self) -> Vec<TradeSummary> {
        let engines = self.trade_engines.lock().await;
        let accessors: Vec<TradeAccess> =
            engines.values().map(|engine| engine.new_accessor()).collect();
        drop(engines);

        let mut summaries = Vec::with_capacity(accessors.len());
        for accessor in accessors {
            summaries.push(accessor.summary().await);
        }
        summaries
    }

    // Local policy

    pub fn ban_currency(&self, currency: Currency) {
        self.banned_currencies.write().unwrap().insert(currency);
    }

    pub fn ban_payment_method(&self, method: FiatPaymentMethod) {
        self.banned_payment_methods.write().unwrap().insert(method);
    }

    pub fn ban_peer(&self, address: Url) {
        self.banned_peers.write().unwrap().insert(address);
    }

    // Teardown

    pub async fn shutdown(self) -> Result<(), SwapError> {
        let mut engines = self.trade_engines.lock().await;
        for (trade_uuid, engine) in engines.drain() {
            let access = engine.new_accessor();
            if let Some(error) = access.shutdown().await.err() {
                error!(
                    "Error shutting down Trade w/ TradeUUID {} - {}",
                    trade_uuid, error
                );
            }
            if let Some(error) = engine.task_handle.await.err() {
                error!(
                    "Error awaiting Trade w/ TradeUUID {} task handle - {}",
                    trade_uuid, error
                );
            }
        }
        drop(engines);

        let registry_access = self.registry.new_accessor();
        if let Some(error) = registry_access.shutdown().await.err() {
            error!("Error shutting down OfferRegistry - {}", error);
        }
        if let Some(error) = self.registry.task_handle.await.err() {
            error!("Error awaiting OfferRegistry task handle - {}", error);
        }
        self.reserved_loop_handle.abort();

        let wallet_access = self.wallet_gate.new_accessor();
        if let Some(error) = wallet_access.shutdown().await.err() {
            error!("Error shutting down WalletGate - {}", error);
        }
        if let Some(error) = self.wallet_gate.task_handle.await.err() {
            error!("Error awaiting WalletGate task handle - {}", error);
        }
        Ok(())
    }
}
