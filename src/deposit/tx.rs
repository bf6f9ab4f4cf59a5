use secp256k1::hashes::{sha256, Hash};
use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

use crate::common::{error::SwapError, types::TxIdString};

// Estimated transaction sizes in vbytes. The true size is not known until
// all signatures exist, so fees are computed against these fixed constants.
// An accepted approximation, not a bug.
pub const DEPOSIT_TX_VBYTES: u64 = 370;
pub const PAYOUT_TX_VBYTES: u64 = 340;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: TxIdString,
    pub vout: u32,
    pub value_sat: u64,
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub value_sat: u64,
}

/// One party's raw contribution to the deposit transaction: selected UTXOs
/// plus an optional change output sized by the wallet.
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct RawInputs {
    pub utxos: Vec<Utxo>,
    pub change: Option<TxOutput>,
}

impl RawInputs {
    pub fn total_value_sat(&self) -> u64 {
        self.utxos.iter().map(|utxo| utxo.value_sat).sum()
    }

    /// Value this party commits to the multisig output after change.
    pub fn contributed_sat(&self, mining_fee_sat: u64) -> u64 {
        let change_sat = self.change.as_ref().map_or(0, |change| change.value_sat);
        self.total_value_sat()
            .saturating_sub(change_sat)
            .saturating_sub(mining_fee_sat)
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct MultisigScript {
    pub maker_pubkey: XOnlyPublicKey,
    pub taker_pubkey: XOnlyPublicKey,
    pub arbitrator_pubkey: XOnlyPublicKey,
}

/// The assembled but unsigned 2-of-3 deposit transaction. Construction is
/// deterministic: inputs and change outputs are sorted, and the multisig
/// output always comes first, so both parties recompute byte-identical
/// serializations from the same raw contributions.
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct UnsignedDepositTx {
    pub inputs: Vec<Utxo>,
    pub multisig_output: TxOutput,
    pub multisig_script: MultisigScript,
    pub change_outputs: Vec<TxOutput>,
}

impl UnsignedDepositTx {
    pub fn canonical_json(&self) -> Result<String, SwapError> {
        let json = serde_json::to_string(self)?;
        Ok(json)
    }

    /// Transaction id derived from the canonical serialization.
    pub fn tx_id(&self) -> Result<TxIdString, SwapError> {
        let json = self.canonical_json()?;
        let hash = sha256::Hash::hash(json.as_bytes());
        Ok(hash.to_string())
    }
}

/// An opaque set of per-input signatures produced by one party's wallet over
/// the unsigned deposit transaction.
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct PartialSignature {
    pub signer_pubkey: XOnlyPublicKey,
    pub input_sigs: Vec<String>,
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct SignedDepositTx {
    pub unsigned_tx: UnsignedDepositTx,
    pub maker_sig: PartialSignature,
    pub taker_sig: PartialSignature,
}

/// Transaction releasing the multisig funds after completion or dispute
/// resolution. Spends the single multisig output of the deposit tx.
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct PayoutTx {
    pub deposit_tx_id: TxIdString,
    pub outputs: Vec<TxOutput>,
}

impl PayoutTx {
    pub fn tx_id(&self) -> Result<TxIdString, SwapError> {
        let json = serde_json::to_string(self)?;
        let hash = sha256::Hash::hash(json.as_bytes());
        Ok(hash.to_string())
    }
}

/// Payout transaction carrying both parties' signatures over the multisig
/// input, ready for broadcast.
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct SignedPayoutTx {
    pub payout_tx: PayoutTx,
    pub maker_sig: PartialSignature,
    pub taker_sig: PartialSignature,
}

impl SignedPayoutTx {
    /// Signatures are witness data and do not factor into the tx id, so both
    /// sides can derive it from the unsigned payout alone.
    pub fn tx_id(&self) -> Result<TxIdString, SwapError> {
        self.payout_tx.tx_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_utxo(id: &str, vout: u32, value_sat: u64) -> Utxo {
        Utxo {
            tx_id: id.to_string(),
            vout,
            value_sat,
        }
    }

    #[test]
    fn contributed_value_accounts_for_change_and_fee() {
        let inputs = RawInputs {
            utxos: vec![some_utxo("aa", 0, 900_000), some_utxo("bb", 1, 400_000)],
            change: Some(TxOutput {
                address: "change-addr".to_string(),
                value_sat: 196_300,
            }),
        };
        assert_eq!(inputs.total_value_sat(), 1_300_000);
        assert_eq!(inputs.contributed_sat(3_700), 1_100_000);
    }

    #[test]
    fn contributed_value_saturates_instead_of_underflowing() {
        let inputs = RawInputs {
            utxos: vec![some_utxo("aa", 0, 1_000)],
            change: None,
        };
        assert_eq!(inputs.contributed_sat(5_000), 0);
    }
}
