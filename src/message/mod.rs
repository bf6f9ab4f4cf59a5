use secp256k1::schnorr::Signature;
use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use url::Url;
use uuid::Uuid;

use crate::common::types::{SerdeGenericTrait, TxIdString};
use crate::deposit::{PartialSignature, PayoutTx, RawInputs};

/// Logical protocol message taxonomy. Wire encoding is whatever the
/// transport collaborator chooses; the engine only cares about these shapes.
#[derive(Clone, Debug, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum TradeMessage {
    AvailabilityRequest {
        taker_pubkey: XOnlyPublicKey,
    },
    AvailabilityResponse {
        available: bool,
    },
    TakeOfferFeePayed {
        fee_tx_id: TxIdString,
        trade_amount_sat: u64,
        trade_price: u64,
        taker_pubkey: XOnlyPublicKey,
        taker_multisig_pubkey: XOnlyPublicKey,
    },
    /// Maker -> Taker: maker's identity, payment details and raw deposit
    /// inputs, requesting the taker's side of the deposit. The maker dictates
    /// the deposit fee rate so both sides derive the same transaction.
    RequestDepositPayment {
        account_id: String,
        payment_details: Box<dyn SerdeGenericTrait>,
        msg_pubkey: XOnlyPublicKey,
        multisig_pubkey: XOnlyPublicKey,
        payout_address: String,
        fee_per_vbyte: u64,
        my_inputs: RawInputs,
    },
    /// Taker -> Maker: the taker's identity plus its independently built
    /// contract, contract signature, raw inputs and partial deposit
    /// signature. The maker verifies the contract byte-identically before
    /// signing anything.
    DepositPayment {
        account_id: String,
        payment_details: Box<dyn SerdeGenericTrait>,
        msg_pubkey: XOnlyPublicKey,
        multisig_pubkey: XOnlyPublicKey,
        payout_address: String,
        contract_json: String,
        contract_sig: Signature,
        my_inputs: RawInputs,
        my_partial_sig: PartialSignature,
    },
    DepositTxPublished {
        deposit_tx_id: TxIdString,
    },
    BankTransferInited {},
    PaymentReceived {},
    /// Maker -> Taker: maker-signed payout proposal; the taker co-signs and
    /// broadcasts.
    SignedPayoutTx {
        payout_tx: PayoutTx,
        maker_sig: PartialSignature,
    },
    PayoutTxPublished {
        payout_tx_id: TxIdString,
    },
    Dispute {
        reason: String,
    },
}

/// Every message travels with the trade it belongs to and, for availability
/// round trips, a nonce tying responses to the outstanding request. Messages
/// whose trade uuid or nonce does not match the active request are dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub trade_uuid: Uuid,
    pub nonce: Option<Uuid>,
    pub sender: Url,
    pub message: TradeMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serde_roundtrip() {
        let envelope = MessageEnvelope {
            trade_uuid: Uuid::from_u128(7),
            nonce: Some(Uuid::from_u128(8)),
            sender: Url::parse("tcp://maker.onion:9999").unwrap(),
            message: TradeMessage::DepositTxPublished {
                deposit_tx_id: "some-tx-id".to_string(),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let restored: MessageEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.trade_uuid, envelope.trade_uuid);
        assert_eq!(restored.nonce, envelope.nonce);
        assert_eq!(restored.message.to_string(), "DepositTxPublished");
    }
}
