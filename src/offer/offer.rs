use iso_currency::Currency;
use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use url::Url;
use uuid::Uuid;

use crate::common::{
    error::TakeOfferRejectReason,
    types::{ArbitratorInfo, Direction, FiatPaymentMethod, PriceSpec, PROTOCOL_VERSION},
};

/// Runtime availability of a published offer. Owned by the Offer Registry;
/// trades reference the offer terms but never its status.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum OfferStatus {
    Available,
    OffererOffline,
    Reserved,
    Closed,
}

/// Immutable terms published by the Maker. The offer uuid doubles as the
/// trade uuid for whichever take attempt wins the reservation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offer {
    pub offer_uuid: Uuid,
    pub direction: Direction,
    pub price: PriceSpec,
    pub currency: Currency,
    pub min_amount_sat: u64,
    pub max_amount_sat: u64,
    pub security_deposit_pct: u64,
    pub payment_method: FiatPaymentMethod,
    pub maker_address: Url,
    pub maker_msg_pubkey: XOnlyPublicKey,
    pub arbitrator: ArbitratorInfo,
    pub protocol_version: u32,
}

impl Offer {
    pub fn security_deposit_sat(&self, trade_amount_sat: u64) -> u64 {
        trade_amount_sat * self.security_deposit_pct / 100
    }

    /// Local checks a Taker runs before touching the network. Failures are
    /// structured rejections, not errors.
    pub fn validate_take(&self, trade_amount_sat: u64) -> Result<(), TakeOfferRejectReason> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(TakeOfferRejectReason::ProtocolVersionMismatch);
        }
        if trade_amount_sat < self.min_amount_sat || trade_amount_sat > self.max_amount_sat {
            return Err(TakeOfferRejectReason::AmountOutOfRange);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::SomeTestOfferParams;

    use super::*;

    #[test]
    fn amount_within_range_validates() {
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        assert!(offer.validate_take(1_000_000).is_ok());
    }

    #[test]
    fn amount_out_of_range_rejects() {
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        assert_eq!(
            offer.validate_take(offer.max_amount_sat + 1).unwrap_err(),
            TakeOfferRejectReason::AmountOutOfRange
        );
        assert_eq!(
            offer.validate_take(offer.min_amount_sat - 1).unwrap_err(),
            TakeOfferRejectReason::AmountOutOfRange
        );
    }

    #[test]
    fn security_deposit_is_percentage_of_amount() {
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        assert_eq!(offer.security_deposit_pct, 10);
        assert_eq!(offer.security_deposit_sat(1_000_000), 100_000);
    }

    #[test]
    fn protocol_version_mismatch_rejects() {
        let mut offer = SomeTestOfferParams::default_builder().build().unwrap();
        offer.protocol_version += 1;
        assert_eq!(
            offer.validate_take(1_000_000).unwrap_err(),
            TakeOfferRejectReason::ProtocolVersionMismatch
        );
    }
}
