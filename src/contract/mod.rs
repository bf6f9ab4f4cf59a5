use secp256k1::hashes::sha256;
use secp256k1::schnorr::Signature;
use secp256k1::{KeyPair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{
    error::SwapError,
    types::{SerdeGenericTrait, TxIdString},
};

/// Canonical agreed-terms document. Field declaration order IS the canonical
/// serialization order; do not reorder fields without bumping the protocol
/// version, since both peers must reproduce byte-identical JSON from their
/// own view of the trade before either signs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contract {
    pub offer_uuid: Uuid,
    pub trade_amount_sat: u64,
    pub trade_price: u64,
    pub taker_fee_tx_id: TxIdString,
    pub maker_account_id: String,
    pub taker_account_id: String,
    pub maker_payment_details: Box<dyn SerdeGenericTrait>,
    pub taker_payment_details: Box<dyn SerdeGenericTrait>,
    pub maker_msg_pubkey: XOnlyPublicKey,
    pub taker_msg_pubkey: XOnlyPublicKey,
}

/// A party's identity and payment fields as they enter the contract. Both
/// peers build one of these for themselves and receive the peer's over the
/// wire, so the pure constructor below sees identical inputs on both sides.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractParty {
    pub account_id: String,
    pub payment_details: Box<dyn SerdeGenericTrait>,
    pub msg_pubkey: XOnlyPublicKey,
}

impl Contract {
    /// Pure function of its inputs. Maker and Taker call this with the same
    /// terms from their own local state; any divergence surfaces as a
    /// byte-level mismatch in `verify_peer_contract`.
    pub fn from_terms(
        offer_uuid: Uuid,
        trade_amount_sat: u64,
        trade_price: u64,
        taker_fee_tx_id: impl Into<TxIdString>,
        maker: ContractParty,
        taker: ContractParty,
    ) -> Self {
        Self {
            offer_uuid,
            trade_amount_sat,
            trade_price,
            taker_fee_tx_id: taker_fee_tx_id.into(),
            maker_account_id: maker.account_id,
            taker_account_id: taker.account_id,
            maker_payment_details: maker.payment_details,
            taker_payment_details: taker.payment_details,
            maker_msg_pubkey: maker.msg_pubkey,
            taker_msg_pubkey: taker.msg_pubkey,
        }
    }

    pub fn canonical_json(&self) -> Result<String, SwapError> {
        let json = serde_json::to_string(self)?;
        Ok(json)
    }

    /// Byte-for-byte comparison of canonical serializations. A mismatch is a
    /// protocol abort before any signature or fund movement, never a silent
    /// continuation.
    pub fn verify_peer_contract(&self, peer_contract_json: &str) -> Result<bool, SwapError> {
        let local_json = self.canonical_json()?;
        Ok(local_json.as_bytes() == peer_contract_json.as_bytes())
    }

    fn signing_message(&self) -> Result<Message, SwapError> {
        let json = self.canonical_json()?;
        Ok(Message::from_hashed_data::<sha256::Hash>(json.as_bytes()))
    }

    pub fn sign(&self, keypair: &KeyPair) -> Result<Signature, SwapError> {
        let secp = Secp256k1::new();
        let message = self.signing_message()?;
        Ok(secp.sign_schnorr(&message, keypair))
    }

    pub fn verify_signature(
        &self,
        signature: &Signature,
        signer_pubkey: &XOnlyPublicKey,
    ) -> Result<(), SwapError> {
        let secp = Secp256k1::verification_only();
        let message = self.signing_message()?;
        secp.verify_schnorr(signature, &message, signer_pubkey)
            .map_err(|error| {
                SwapError::BadSignature(format!(
                    "Contract signature by {} failed verification - {}",
                    signer_pubkey, error
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use secp256k1::rand::rngs::OsRng;

    use crate::common::types::BankAccountDetails;

    use super::*;

    fn some_keypair() -> KeyPair {
        let secp = Secp256k1::new();
        KeyPair::new(&secp, &mut OsRng)
    }

    fn some_party(account_id: &str, keypair: &KeyPair) -> ContractParty {
        ContractParty {
            account_id: account_id.to_string(),
            payment_details: Box::new(BankAccountDetails {
                holder_name: format!("{} Holder", account_id),
                account_no: "12345678".to_string(),
                bank_id: "21000021".to_string(),
            }),
            msg_pubkey: XOnlyPublicKey::from_keypair(keypair).0,
        }
    }

    fn some_contract(maker_keypair: &KeyPair, taker_keypair: &KeyPair) -> Contract {
        Contract::from_terms(
            Uuid::from_u128(42),
            1_000_000,
            50_000,
            "fee-tx-id",
            some_party("maker-acct", maker_keypair),
            some_party("taker-acct", taker_keypair),
        )
    }

    #[test]
    fn independently_built_contracts_serialize_identically() {
        let maker_keypair = some_keypair();
        let taker_keypair = some_keypair();
        let maker_view = some_contract(&maker_keypair, &taker_keypair);
        let taker_view = some_contract(&maker_keypair, &taker_keypair);

        let peer_json = taker_view.canonical_json().unwrap();
        assert!(maker_view.verify_peer_contract(&peer_json).unwrap());
    }

    #[test]
    fn mutated_account_id_fails_contract_verification() {
        let maker_keypair = some_keypair();
        let taker_keypair = some_keypair();
        let maker_view = some_contract(&maker_keypair, &taker_keypair);
        let mut taker_view = some_contract(&maker_keypair, &taker_keypair);
        taker_view.taker_account_id = "mutated-acct".to_string();

        let peer_json = taker_view.canonical_json().unwrap();
        assert!(!maker_view.verify_peer_contract(&peer_json).unwrap());
    }

    #[test]
    fn signature_roundtrip_verifies_against_signer_only() {
        let maker_keypair = some_keypair();
        let taker_keypair = some_keypair();
        let contract = some_contract(&maker_keypair, &taker_keypair);

        let signature = contract.sign(&taker_keypair).unwrap();
        let taker_pubkey = XOnlyPublicKey::from_keypair(&taker_keypair).0;
        let maker_pubkey = XOnlyPublicKey::from_keypair(&maker_keypair).0;

        assert!(contract.verify_signature(&signature, &taker_pubkey).is_ok());
        assert!(matches!(
            contract.verify_signature(&signature, &maker_pubkey),
            Err(SwapError::BadSignature(_))
        ));
    }

    #[test]
    fn signature_over_mutated_contract_fails() {
        let maker_keypair = some_keypair();
        let taker_keypair = some_keypair();
        let contract = some_contract(&maker_keypair, &taker_keypair);
        let signature = contract.sign(&taker_keypair).unwrap();
        let taker_pubkey = XOnlyPublicKey::from_keypair(&taker_keypair).0;

        let mut mutated = some_contract(&maker_keypair, &taker_keypair);
        mutated.trade_amount_sat += 1;
        assert!(matches!(
            mutated.verify_signature(&signature, &taker_pubkey),
            Err(SwapError::BadSignature(_))
        ));
    }
}
