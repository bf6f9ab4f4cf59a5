use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};
use url::Url;

use std::any::Any;
use std::fmt::Debug;
use std::time::Duration;

use secp256k1::XOnlyPublicKey;

pub type TxIdString = String;

pub const PROTOCOL_VERSION: u32 = 1;

/// Direction of the Maker's Bitcoin side. A `Buy` offer means the Maker buys
/// Bitcoin and pays fiat; the Taker sells Bitcoin and receives fiat.
#[derive(
    PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize, EnumString, Display,
    IntoStaticStr,
)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn mirror(&self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

/// Offer price. Either a fixed fiat price per Bitcoin, or a margin against a
/// market oracle expressed in basis points. No floating point anywhere.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum PriceSpec {
    Fixed { price: u64 },
    MarketMargin { basis_points: i64 },
}

// List of fiat payment methods based on
// https://github.com/bisq-network/bisq/blob/release/v1.9.10/core/src/main/java/bisq/core/payment/payload/PaymentMethod.java
// Trade limits and risk association are for the higher level to determine.
#[derive(
    PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize, EnumString, Display,
    IntoStaticStr,
)]
pub enum FiatPaymentMethod {
    Revolut,
    Sepa,
    SepaInstant,
    FasterPayments,
    NationalBank,
    Swish,
    Zelle,
    InteracETransfer,
    MoneyGram,
    WesternUnion,
    FaceToFace,
    TransferWise,
    Pix,
    CashByMail,
    Strike,
    SWIFT,
    ACHTransfer,
    DomesticWireTransfer,
    CashApp,
    Venmo,
}

#[typetag::serde(tag = "type")]
pub trait SerdeGenericTrait: DynClone + Debug + Send + Sync {
    fn any_ref(&self) -> &dyn Any;
}

dyn_clone::clone_trait_object!(SerdeGenericTrait);

impl dyn SerdeGenericTrait {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.any_ref().downcast_ref()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerdeGenericsPlaceholder {}

#[typetag::serde(name = "satswap-placeholder")]
impl SerdeGenericTrait for SerdeGenericsPlaceholder {
    fn any_ref(&self) -> &dyn Any {
        self
    }
}

/// Default concrete payment-account detail payload. Other methods can ship
/// their own `SerdeGenericTrait` implementations without touching the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BankAccountDetails {
    pub holder_name: String,
    pub account_no: String,
    pub bank_id: String,
}

#[typetag::serde(name = "satswap-bank-account")]
impl SerdeGenericTrait for BankAccountDetails {
    fn any_ref(&self) -> &dyn Any {
        self
    }
}

/// Known third-party fallback signer. Long-lived and shared across many
/// trades, so offers reference it by value but never own its lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArbitratorInfo {
    pub address: Url,
    pub pubkey: XOnlyPublicKey,
}

/// Engine-wide tunables. The fee-validation peer count is deliberately
/// configurable rather than hardcoded. The original protocol required the
/// take-offer fee tx to be seen by more than 2 broadcast peers before
/// continuing, as a fast probabilistic double-spend check in place of waiting
/// for a confirmation. Dispute handling assumes exactly this semantic, so
/// strengthening it to full confirmation here would change the protocol.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub request_timeout: Duration,
    pub fee_poll_interval: Duration,
    pub min_fee_broadcast_peers: u32,
    pub max_broadcast_attempts: u32,
    pub take_offer_fee_sat: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            fee_poll_interval: Duration::from_secs(5),
            min_fee_broadcast_peers: 2,
            max_broadcast_attempts: 3,
            take_offer_fee_sat: 20_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn direction_mirror_roundtrip() {
        assert_eq!(Direction::Buy.mirror(), Direction::Sell);
        assert_eq!(Direction::Sell.mirror().mirror(), Direction::Sell);
    }

    #[test]
    fn fiat_payment_method_from_string() {
        let method = FiatPaymentMethod::from_str("Zelle").unwrap();
        assert_eq!(method, FiatPaymentMethod::Zelle);
        assert!(FiatPaymentMethod::from_str("CarrierPigeon").is_err());
    }

    #[test]
    fn bank_account_details_serde_through_trait_object() {
        let details: Box<dyn SerdeGenericTrait> = Box::new(BankAccountDetails {
            holder_name: "Satoshi Nakamoto".to_string(),
            account_no: "12345678".to_string(),
            bank_id: "21000021".to_string(),
        });
        let json = serde_json::to_string(&details).unwrap();
        let restored: Box<dyn SerdeGenericTrait> = serde_json::from_str(&json).unwrap();
        let restored_details = restored.downcast_ref::<BankAccountDetails>().unwrap();
        assert_eq!(restored_details.account_no, "12345678");
    }
}
