use secp256k1::hashes::{sha256, Hash};
use tracing::debug;

use crate::common::error::SwapError;

use super::tx::*;

/// Deterministic construction and cross-checking of the 2-of-3 multisig
/// deposit transaction. Both parties instantiate a coordinator from the same
/// agreed trade terms; every quantity derived here must therefore come out
/// identical on both sides, or the trade must abort before signing.
///
/// Contribution model: each party locks the trade amount plus its security
/// deposit, so the multisig output carries
/// `2 * (trade_amount + security_deposit)`. At payout the fiat buyer receives
/// its contribution back plus the traded amount, the fiat receiver gets its
/// security deposit back.
#[derive(Clone, Debug)]
pub struct DepositCoordinator {
    multisig_script: MultisigScript,
    trade_amount_sat: u64,
    security_deposit_sat: u64,
    fee_per_vbyte: u64,
}

impl DepositCoordinator {
    pub fn new(
        multisig_script: MultisigScript,
        trade_amount_sat: u64,
        security_deposit_sat: u64,
        fee_per_vbyte: u64,
    ) -> Self {
        Self {
            multisig_script,
            trade_amount_sat,
            security_deposit_sat,
            fee_per_vbyte,
        }
    }

    /// What each party commits to the multisig output.
    pub fn side_contribution_sat(&self) -> u64 {
        self.trade_amount_sat + self.security_deposit_sat
    }

    pub fn deposit_mining_fee_sat(&self) -> u64 {
        self.fee_per_vbyte * DEPOSIT_TX_VBYTES
    }

    /// Mining fee share carried by each side's inputs.
    pub fn side_mining_fee_sat(&self) -> u64 {
        self.deposit_mining_fee_sat() / 2
    }

    /// Total input value one side must fund: contribution plus fee share.
    /// The wallet adds a change output for anything selected above this.
    pub fn input_target_sat(&self) -> u64 {
        self.side_contribution_sat() + self.side_mining_fee_sat()
    }

    pub fn multisig_output_sat(&self) -> u64 {
        2 * self.side_contribution_sat()
    }

    /// Address of the 2-of-3 output, derived from the three pubkeys. The
    /// wallet collaborator owns real script construction; the engine only
    /// needs a deterministic identifier both sides agree on.
    pub fn multisig_address(&self) -> String {
        let preimage = format!(
            "2of3:{}:{}:{}",
            self.multisig_script.maker_pubkey,
            self.multisig_script.taker_pubkey,
            self.multisig_script.arbitrator_pubkey
        );
        let hash = sha256::Hash::hash(preimage.as_bytes());
        format!("msig-{}", hash)
    }

    /// Rejects peer-supplied raw inputs whose committed value disagrees with
    /// the locally recomputed expectation from the agreed trade terms.
    pub fn verify_side_inputs(&self, inputs: &RawInputs, side: &str) -> Result<(), SwapError> {
        let contributed_sat = inputs.contributed_sat(self.side_mining_fee_sat());
        let expected_sat = self.side_contribution_sat();
        if contributed_sat != expected_sat {
            return Err(SwapError::DepositMismatch(format!(
                "{} inputs commit {} sat to multisig, expected {} sat",
                side, contributed_sat, expected_sat
            )));
        }
        Ok(())
    }

    /// Assembles the unsigned deposit transaction from both parties' raw
    /// inputs. Inputs and change outputs are sorted so assembly order does
    /// not depend on which side contributed what first.
    pub fn assemble_deposit(
        &self,
        maker_inputs: &RawInputs,
        taker_inputs: &RawInputs,
    ) -> Result<UnsignedDepositTx, SwapError> {
        self.verify_side_inputs(maker_inputs, "Maker")?;
        self.verify_side_inputs(taker_inputs, "Taker")?;

        let mut inputs: Vec<Utxo> = maker_inputs
            .utxos
            .iter()
            .chain(taker_inputs.utxos.iter())
            .cloned()
            .collect();
        inputs.sort();

        let mut change_outputs: Vec<TxOutput> = maker_inputs
            .change
            .iter()
            .chain(taker_inputs.change.iter())
            .cloned()
            .collect();
        change_outputs.sort();

        let unsigned_tx = UnsignedDepositTx {
            inputs,
            multisig_output: TxOutput {
                address: self.multisig_address(),
                value_sat: self.multisig_output_sat(),
            },
            multisig_script: self.multisig_script.clone(),
            change_outputs,
        };

        debug!(
            "Assembled deposit tx {} with multisig output of {} sat",
            unsigned_tx.tx_id()?,
            unsigned_tx.multisig_output.value_sat
        );

        Ok(unsigned_tx)
    }

    /// Checks a partial signature covers exactly the inputs its signer
    /// contributed and that it was produced by the expected key.
    pub fn verify_partial_sig(
        &self,
        partial_sig: &PartialSignature,
        side_inputs: &RawInputs,
        expected_pubkey: &secp256k1::XOnlyPublicKey,
    ) -> Result<(), SwapError> {
        if &partial_sig.signer_pubkey != expected_pubkey {
            return Err(SwapError::BadSignature(format!(
                "Partial signature signed by {}, expected {}",
                partial_sig.signer_pubkey, expected_pubkey
            )));
        }
        if partial_sig.input_sigs.len() != side_inputs.utxos.len() {
            return Err(SwapError::BadSignature(format!(
                "Partial signature covers {} inputs, side contributed {}",
                partial_sig.input_sigs.len(),
                side_inputs.utxos.len()
            )));
        }
        Ok(())
    }

    pub fn finalize_deposit(
        &self,
        unsigned_tx: UnsignedDepositTx,
        maker_sig: PartialSignature,
        taker_sig: PartialSignature,
    ) -> Result<SignedDepositTx, SwapError> {
        let signed_inputs = maker_sig.input_sigs.len() + taker_sig.input_sigs.len();
        if signed_inputs != unsigned_tx.inputs.len() {
            return Err(SwapError::BadSignature(format!(
                "Deposit tx has {} inputs but only {} signatures across both parties",
                unsigned_tx.inputs.len(),
                signed_inputs
            )));
        }
        Ok(SignedDepositTx {
            unsigned_tx,
            maker_sig,
            taker_sig,
        })
    }

    pub fn payout_mining_fee_sat(&self) -> u64 {
        self.fee_per_vbyte * PAYOUT_TX_VBYTES
    }

    /// Deterministic payout split. The fiat-paying side (Bitcoin buyer) ends
    /// up with its own contribution back plus the traded amount; the other
    /// side recovers its security deposit. Mining fee is shared evenly.
    pub fn payout_tx(
        &self,
        deposit_tx_id: impl Into<String>,
        buyer_payout_address: impl Into<String>,
        seller_payout_address: impl Into<String>,
    ) -> PayoutTx {
        let fee_share_sat = self.payout_mining_fee_sat() / 2;
        let buyer_sat = (2 * self.trade_amount_sat + self.security_deposit_sat)
            .saturating_sub(fee_share_sat);
        let seller_sat = self.security_deposit_sat.saturating_sub(fee_share_sat);

        PayoutTx {
            deposit_tx_id: deposit_tx_id.into(),
            outputs: vec![
                TxOutput {
                    address: buyer_payout_address.into(),
                    value_sat: buyer_sat,
                },
                TxOutput {
                    address: seller_payout_address.into(),
                    value_sat: seller_sat,
                },
            ],
        }
    }

    /// Combines both parties' payout signatures. The deposit multisig admits
    /// neither side alone, so a payout missing either co-signature must
    /// never reach broadcast.
    pub fn finalize_payout(
        &self,
        payout_tx: PayoutTx,
        maker_sig: PartialSignature,
        taker_sig: PartialSignature,
    ) -> Result<SignedPayoutTx, SwapError> {
        if maker_sig.signer_pubkey != self.multisig_script.maker_pubkey {
            return Err(SwapError::BadSignature(format!(
                "Payout signed by {}, expected Maker key {}",
                maker_sig.signer_pubkey, self.multisig_script.maker_pubkey
            )));
        }
        if taker_sig.signer_pubkey != self.multisig_script.taker_pubkey {
            return Err(SwapError::BadSignature(format!(
                "Payout signed by {}, expected Taker key {}",
                taker_sig.signer_pubkey, self.multisig_script.taker_pubkey
            )));
        }
        if maker_sig.input_sigs.is_empty() || taker_sig.input_sigs.is_empty() {
            return Err(SwapError::BadSignature(
                "Payout co-signature carries no input signatures".to_string(),
            ));
        }
        Ok(SignedPayoutTx {
            payout_tx,
            maker_sig,
            taker_sig,
        })
    }

    /// Peer-supplied payout transactions must match the local recomputation
    /// exactly before co-signing.
    pub fn verify_payout_tx(
        &self,
        peer_payout_tx: &PayoutTx,
        deposit_tx_id: &str,
        buyer_payout_address: &str,
        seller_payout_address: &str,
    ) -> Result<(), SwapError> {
        let expected = self.payout_tx(deposit_tx_id, buyer_payout_address, seller_payout_address);
        if peer_payout_tx != &expected {
            return Err(SwapError::DepositMismatch(
                "Peer payout tx disagrees with locally recomputed payout".to_string(),
            ));
        }
        Ok(())
    }
}
