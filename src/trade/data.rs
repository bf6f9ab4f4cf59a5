use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use secp256k1::schnorr::Signature;
use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::common::{
    error::SwapError,
    persist::Persister,
    types::{SerdeGenericTrait, TxIdString},
};
use crate::contract::{Contract, ContractParty};
use crate::deposit::{PartialSignature, PayoutTx, RawInputs, UnsignedDepositTx};
use crate::offer::Offer;

use super::state::{TradeRole, TradeState};

/// The persisted record of a trade. Everything a restarted node needs to
/// resume the protocol from the last completed transition lives here;
/// in-flight scratch that can be recomputed does not.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct TradeDataStore {
    role: TradeRole,
    offer: Offer,
    state: TradeState,
    peer_address: Url,
    trade_amount_sat: u64,
    trade_price: u64,
    fee_tx_id: Option<TxIdString>,
    fee_per_vbyte: Option<u64>,
    my_payout_address: Option<String>,
    my_multisig_pubkey: Option<XOnlyPublicKey>,
    peer_party: Option<ContractParty>,
    peer_payout_address: Option<String>,
    peer_multisig_pubkey: Option<XOnlyPublicKey>,
    my_inputs: Option<RawInputs>,
    peer_inputs: Option<RawInputs>,
    contract: Option<Contract>,
    my_contract_sig: Option<Signature>,
    peer_contract_sig: Option<Signature>,
    my_partial_sig: Option<PartialSignature>,
    peer_partial_sig: Option<PartialSignature>,
    unsigned_deposit_tx: Option<UnsignedDepositTx>,
    deposit_tx_id: Option<TxIdString>,
    deposit_depth: u32,
    payout_tx: Option<PayoutTx>,
    payout_tx_id: Option<TxIdString>,
    fail_reason: Option<String>,
}

#[typetag::serde(name = "satswap-trade-data")]
impl SerdeGenericTrait for TradeDataStore {
    fn any_ref(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct TradeData {
    pub(crate) trade_uuid: Uuid,
    store: Arc<RwLock<TradeDataStore>>,
    persister: Persister,
}

impl TradeData {
    pub(crate) fn new(
        role: TradeRole,
        offer: Offer,
        state: TradeState,
        peer_address: Url,
        data_dir: impl AsRef<Path>,
    ) -> Self {
        let trade_uuid = offer.offer_uuid;
        let store = TradeDataStore {
            role,
            offer,
            state,
            peer_address,
            trade_amount_sat: 0,
            trade_price: 0,
            fee_tx_id: None,
            fee_per_vbyte: None,
            my_payout_address: None,
            my_multisig_pubkey: None,
            peer_party: None,
            peer_payout_address: None,
            peer_multisig_pubkey: None,
            my_inputs: None,
            peer_inputs: None,
            contract: None,
            my_contract_sig: None,
            peer_contract_sig: None,
            my_partial_sig: None,
            peer_partial_sig: None,
            unsigned_deposit_tx: None,
            deposit_tx_id: None,
            deposit_depth: 0,
            payout_tx: None,
            payout_tx_id: None,
            fail_reason: None,
        };
        let store = Arc::new(RwLock::new(store));
        let generic_store: Arc<RwLock<dyn SerdeGenericTrait>> = store.clone();
        let persister = Persister::new(generic_store, Self::data_path(trade_uuid, data_dir));
        Self {
            trade_uuid,
            store,
            persister,
        }
    }

    pub(crate) fn restore(data_path: impl AsRef<Path>) -> Result<Self, SwapError> {
        let json = Persister::restore(&data_path)?;
        let restored: Box<dyn SerdeGenericTrait> = serde_json::from_str(&json)?;
        let store = restored
            .downcast_ref::<TradeDataStore>()
            .ok_or_else(|| {
                SwapError::Simple(format!(
                    "Restored record at {} is not a trade record",
                    data_path.as_ref().display()
                ))
            })?
            .clone();
        let trade_uuid = store.offer.offer_uuid;
        let store = Arc::new(RwLock::new(store));
        let generic_store: Arc<RwLock<dyn SerdeGenericTrait>> = store.clone();
        let persister = Persister::new(generic_store, data_path);
        Ok(Self {
            trade_uuid,
            store,
            persister,
        })
    }

    pub(crate) fn data_path(trade_uuid: Uuid, data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join(format!("{}-trade.json", trade_uuid))
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, TradeDataStore> {
        self.store.read().unwrap()
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, TradeDataStore> {
        self.store.write().unwrap()
    }

    pub(crate) fn terminate(self) {
        self.persister.terminate();
    }

    // Getters

    pub(crate) fn role(&self) -> TradeRole {
        self.read_lock().role
    }

    pub(crate) fn offer(&self) -> Offer {
        self.read_lock().offer.clone()
    }

    pub(crate) fn state(&self) -> TradeState {
        self.read_lock().state
    }

    pub(crate) fn peer_address(&self) -> Url {
        self.read_lock().peer_address.clone()
    }

    pub(crate) fn trade_amount_sat(&self) -> u64 {
        self.read_lock().trade_amount_sat
    }

    pub(crate) fn trade_price(&self) -> u64 {
        self.read_lock().trade_price
    }

    pub(crate) fn fee_tx_id(&self) -> Option<TxIdString> {
        self.read_lock().fee_tx_id.clone()
    }

    pub(crate) fn fee_per_vbyte(&self) -> Option<u64> {
        self.read_lock().fee_per_vbyte
    }

    pub(crate) fn my_payout_address(&self) -> Option<String> {
        self.read_lock().my_payout_address.clone()
    }

    pub(crate) fn my_multisig_pubkey(&self) -> Option<XOnlyPublicKey> {
        self.read_lock().my_multisig_pubkey
    }

    pub(crate) fn peer_party(&self) -> Option<ContractParty> {
        self.read_lock().peer_party.clone()
    }

    pub(crate) fn peer_payout_address(&self) -> Option<String> {
        self.read_lock().peer_payout_address.clone()
    }

    pub(crate) fn peer_multisig_pubkey(&self) -> Option<XOnlyPublicKey> {
        self.read_lock().peer_multisig_pubkey
    }

    pub(crate) fn my_inputs(&self) -> Option<RawInputs> {
        self.read_lock().my_inputs.clone()
    }

    pub(crate) fn peer_partial_sig(&self) -> Option<PartialSignature> {
        self.read_lock().peer_partial_sig.clone()
    }

    pub(crate) fn my_partial_sig(&self) -> Option<PartialSignature> {
        self.read_lock().my_partial_sig.clone()
    }

    pub(crate) fn unsigned_deposit_tx(&self) -> Option<UnsignedDepositTx> {
        self.read_lock().unsigned_deposit_tx.clone()
    }

    pub(crate) fn deposit_tx_id(&self) -> Option<TxIdString> {
        self.read_lock().deposit_tx_id.clone()
    }

    pub(crate) fn deposit_depth(&self) -> u32 {
        self.read_lock().deposit_depth
    }

    pub(crate) fn payout_tx(&self) -> Option<PayoutTx> {
        self.read_lock().payout_tx.clone()
    }

    pub(crate) fn payout_tx_id(&self) -> Option<TxIdString> {
        self.read_lock().payout_tx_id.clone()
    }

    pub(crate) fn fail_reason(&self) -> Option<String> {
        self.read_lock().fail_reason.clone()
    }

    // Setters. Every mutation queues a persistence snapshot.

    pub(crate) fn set_state(&self, state: TradeState) {
        self.write_lock().state = state;
        self.persister.queue();
    }

    pub(crate) fn set_trade_terms(&self, trade_amount_sat: u64, trade_price: u64) {
        let mut store = self.write_lock();
        store.trade_amount_sat = trade_amount_sat;
        store.trade_price = trade_price;
        drop(store);
        self.persister.queue();
    }

    pub(crate) fn set_fee_tx_id(&self, fee_tx_id: TxIdString) {
        self.write_lock().fee_tx_id = Some(fee_tx_id);
        self.persister.queue();
    }

    pub(crate) fn set_fee_per_vbyte(&self, fee_per_vbyte: u64) {
        self.write_lock().fee_per_vbyte = Some(fee_per_vbyte);
        self.persister.queue();
    }

    pub(crate) fn set_my_address_entry(
        &self,
        payout_address: String,
        multisig_pubkey: XOnlyPublicKey,
    ) {
        let mut store = self.write_lock();
        store.my_payout_address = Some(payout_address);
        store.my_multisig_pubkey = Some(multisig_pubkey);
        drop(store);
        self.persister.queue();
    }

    pub(crate) fn set_peer_party(&self, party: ContractParty) {
        self.write_lock().peer_party = Some(party);
        self.persister.queue();
    }

    pub(crate) fn set_peer_payout_address(&self, payout_address: String) {
        self.write_lock().peer_payout_address = Some(payout_address);
        self.persister.queue();
    }

    pub(crate) fn set_peer_multisig_pubkey(&self, multisig_pubkey: XOnlyPublicKey) {
        self.write_lock().peer_multisig_pubkey = Some(multisig_pubkey);
        self.persister.queue();
    }

    pub(crate) fn set_my_inputs(&self, inputs: RawInputs) {
        self.write_lock().my_inputs = Some(inputs);
        self.persister.queue();
    }

    pub(crate) fn set_peer_inputs(&self, inputs: RawInputs) {
        self.write_lock().peer_inputs = Some(inputs);
        self.persister.queue();
    }

    pub(crate) fn set_contract(&self, contract: Contract) {
        self.write_lock().contract = Some(contract);
        self.persister.queue();
    }

    pub(crate) fn set_my_contract_sig(&self, sig: Signature) {
        self.write_lock().my_contract_sig = Some(sig);
        self.persister.queue();
    }

    pub(crate) fn set_peer_contract_sig(&self, sig: Signature) {
        self.write_lock().peer_contract_sig = Some(sig);
        self.persister.queue();
    }

    pub(crate) fn set_my_partial_sig(&self, sig: PartialSignature) {
        self.write_lock().my_partial_sig = Some(sig);
        self.persister.queue();
    }

    pub(crate) fn set_peer_partial_sig(&self, sig: PartialSignature) {
        self.write_lock().peer_partial_sig = Some(sig);
        self.persister.queue();
    }

    pub(crate) fn set_unsigned_deposit_tx(&self, unsigned_tx: UnsignedDepositTx) {
        self.write_lock().unsigned_deposit_tx = Some(unsigned_tx);
        self.persister.queue();
    }

    pub(crate) fn set_deposit_tx_id(&self, deposit_tx_id: TxIdString) {
        self.write_lock().deposit_tx_id = Some(deposit_tx_id);
        self.persister.queue();
    }

    pub(crate) fn set_deposit_depth(&self, depth: u32) {
        self.write_lock().deposit_depth = depth;
        self.persister.queue();
    }

    pub(crate) fn set_payout_tx(&self, payout_tx: PayoutTx) {
        self.write_lock().payout_tx = Some(payout_tx);
        self.persister.queue();
    }

    pub(crate) fn set_payout_tx_id(&self, payout_tx_id: TxIdString) {
        self.write_lock().payout_tx_id = Some(payout_tx_id);
        self.persister.queue();
    }

    pub(crate) fn set_fail_reason(&self, reason: String) {
        self.write_lock().fail_reason = Some(reason);
        self.persister.queue();
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::SomeTestOfferParams;

    use super::*;

    #[test]
    fn trade_data_persists_and_restores() {
        let data_dir = tempfile_dir();
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        let trade_uuid = offer.offer_uuid;
        let peer_address = Url::parse("tcp://taker.onion:9999").unwrap();

        let data = TradeData::new(
            TradeRole::Maker,
            offer,
            TradeState::Init,
            peer_address,
            &data_dir,
        );
        data.set_trade_terms(1_000_000, 50_000);
        data.set_state(TradeState::TakeOfferFeeValidated);
        data.set_fee_tx_id("fee-tx-id".to_string());
        data.terminate();

        let data_path = TradeData::data_path(trade_uuid, &data_dir);
        let restored = TradeData::restore(&data_path).unwrap();
        assert_eq!(restored.trade_uuid, trade_uuid);
        assert_eq!(restored.role(), TradeRole::Maker);
        assert_eq!(restored.state(), TradeState::TakeOfferFeeValidated);
        assert_eq!(restored.trade_amount_sat(), 1_000_000);
        assert_eq!(restored.fee_tx_id().unwrap(), "fee-tx-id");
        restored.terminate();

        let _ = std::fs::remove_dir_all(&data_dir);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("satswap-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
