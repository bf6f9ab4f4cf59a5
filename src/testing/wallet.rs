use std::collections::HashMap;

use secp256k1::{rand::rngs::OsRng, KeyPair, Secp256k1, XOnlyPublicKey};
use uuid::Uuid;

use crate::collaborator::wallet::{AddressEntry, WalletFault, WalletOracle};
use crate::common::types::TxIdString;
use crate::deposit::{
    PartialSignature, PayoutTx, RawInputs, SignedDepositTx, SignedPayoutTx, TxOutput,
    UnsignedDepositTx, Utxo,
};

/// Scripted wallet oracle. Funds are a flat pool of fake UTXOs; coin
/// selection is greedy and per-trade reservations behave like the real
/// contract demands. Broadcast failures can be scripted to exercise the
/// bounded retry path.
pub struct TestWallet {
    label: String,
    fee_per_vbyte: u64,
    spendable: Vec<Utxo>,
    reserved: HashMap<Uuid, Vec<Utxo>>,
    address_entries: HashMap<Uuid, AddressEntry>,
    deposit_broadcast_failures: u32,
    payout_broadcast_failures: u32,
    next_utxo_index: u32,
}

impl TestWallet {
    pub fn new(label: impl Into<String>, fee_per_vbyte: u64, utxo_values_sat: Vec<u64>) -> Self {
        let label = label.into();
        let spendable = utxo_values_sat
            .into_iter()
            .enumerate()
            .map(|(index, value_sat)| Utxo {
                tx_id: format!("{}-funding-{}", label, index),
                vout: 0,
                value_sat,
            })
            .collect();
        Self {
            label,
            fee_per_vbyte,
            spendable,
            reserved: HashMap::new(),
            address_entries: HashMap::new(),
            deposit_broadcast_failures: 0,
            payout_broadcast_failures: 0,
            next_utxo_index: 0,
        }
    }

    /// The next `count` deposit broadcasts will fail before one succeeds.
    pub fn fail_deposit_broadcasts(&mut self, count: u32) {
        self.deposit_broadcast_failures = count;
    }

    pub fn fail_payout_broadcasts(&mut self, count: u32) {
        self.payout_broadcast_failures = count;
    }

    fn some_pubkey() -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let keypair = KeyPair::new(&secp, &mut OsRng);
        XOnlyPublicKey::from_keypair(&keypair).0
    }

    fn available_sat(&self) -> u64 {
        self.spendable.iter().map(|utxo| utxo.value_sat).sum()
    }
}

impl WalletOracle for TestWallet {
    fn fee_per_vbyte(&self) -> u64 {
        self.fee_per_vbyte
    }

    fn get_or_create_address_entry(
        &mut self,
        trade_uuid: Uuid,
    ) -> Result<AddressEntry, WalletFault> {
        let label = self.label.clone();
        let entry = self
            .address_entries
            .entry(trade_uuid)
            .or_insert_with(|| AddressEntry {
                payout_address: format!("{}-payout-{}", label, trade_uuid),
                multisig_pubkey: Self::some_pubkey(),
            });
        Ok(entry.clone())
    }

    fn build_inputs_for_amount(
        &mut self,
        trade_uuid: Uuid,
        target_sat: u64,
    ) -> Result<RawInputs, WalletFault> {
        if self.available_sat() < target_sat {
            return Err(WalletFault::InsufficientFunds {
                needed_sat: target_sat,
                available_sat: self.available_sat(),
            });
        }

        let mut selected: Vec<Utxo> = Vec::new();
        let mut selected_sat = 0;
        while selected_sat < target_sat {
            let utxo = self.spendable.remove(0);
            selected_sat += utxo.value_sat;
            selected.push(utxo);
        }
        self.reserved.insert(trade_uuid, selected.clone());
        self.next_utxo_index += 1;

        let change_sat = selected_sat - target_sat;
        let change = if change_sat > 0 {
            Some(TxOutput {
                address: format!("{}-change-{}", self.label, self.next_utxo_index),
                value_sat: change_sat,
            })
        } else {
            None
        };
        Ok(RawInputs {
            utxos: selected,
            change,
        })
    }

    fn release_inputs(&mut self, trade_uuid: Uuid) {
        if let Some(utxos) = self.reserved.remove(&trade_uuid) {
            self.spendable.extend(utxos);
        }
    }

    fn pay_fee(&mut self, trade_uuid: Uuid, _fee_sat: u64) -> Result<TxIdString, WalletFault> {
        Ok(format!("{}-fee-tx-{}", self.label, trade_uuid))
    }

    fn sign_deposit_inputs(
        &mut self,
        trade_uuid: Uuid,
        unsigned_tx: &UnsignedDepositTx,
    ) -> Result<PartialSignature, WalletFault> {
        let entry = self.address_entries.get(&trade_uuid).ok_or_else(|| {
            WalletFault::SigningFailure(format!("No address entry for trade {}", trade_uuid))
        })?;
        let reserved = self.reserved.get(&trade_uuid).ok_or_else(|| {
            WalletFault::SigningFailure(format!("No reserved inputs for trade {}", trade_uuid))
        })?;

        // Sign only the inputs this wallet contributed
        let input_sigs = unsigned_tx
            .inputs
            .iter()
            .filter(|input| {
                reserved
                    .iter()
                    .any(|utxo| utxo.tx_id == input.tx_id && utxo.vout == input.vout)
            })
            .map(|input| format!("{}-sig-{}:{}", self.label, input.tx_id, input.vout))
            .collect();
        Ok(PartialSignature {
            signer_pubkey: entry.multisig_pubkey,
            input_sigs,
        })
    }

    fn broadcast_deposit(
        &mut self,
        signed_tx: &SignedDepositTx,
    ) -> Result<TxIdString, WalletFault> {
        if self.deposit_broadcast_failures > 0 {
            self.deposit_broadcast_failures -= 1;
            return Err(WalletFault::BroadcastFailure(
                "scripted deposit broadcast failure".to_string(),
            ));
        }
        signed_tx
            .unsigned_tx
            .tx_id()
            .map_err(|error| WalletFault::BroadcastFailure(error.to_string()))
    }

    fn sign_payout(
        &mut self,
        trade_uuid: Uuid,
        _payout_tx: &PayoutTx,
    ) -> Result<PartialSignature, WalletFault> {
        let entry = self.address_entries.get(&trade_uuid).ok_or_else(|| {
            WalletFault::SigningFailure(format!("No address entry for trade {}", trade_uuid))
        })?;
        Ok(PartialSignature {
            signer_pubkey: entry.multisig_pubkey,
            input_sigs: vec![format!("{}-payout-sig-{}", self.label, trade_uuid)],
        })
    }

    fn broadcast_payout(&mut self, signed_tx: &SignedPayoutTx) -> Result<TxIdString, WalletFault> {
        if self.payout_broadcast_failures > 0 {
            self.payout_broadcast_failures -= 1;
            return Err(WalletFault::BroadcastFailure(
                "scripted payout broadcast failure".to_string(),
            ));
        }
        if signed_tx.maker_sig.input_sigs.is_empty() || signed_tx.taker_sig.input_sigs.is_empty() {
            return Err(WalletFault::BroadcastFailure(
                "payout tx missing a co-signature".to_string(),
            ));
        }
        signed_tx
            .tx_id()
            .map_err(|error| WalletFault::BroadcastFailure(error.to_string()))
    }
}
