use std::result::Result;

use iso_currency::Currency;
use secp256k1::XOnlyPublicKey;
use url::Url;
use uuid::Uuid;

use crate::common::{
    error::SwapError,
    types::{ArbitratorInfo, Direction, FiatPaymentMethod, PriceSpec, PROTOCOL_VERSION},
};

use super::Offer;

pub struct OfferBuilder {
    offer_uuid: Option<Uuid>,
    direction: Option<Direction>,
    price: Option<PriceSpec>,
    currency: Option<Currency>,
    min_amount_sat: Option<u64>,
    max_amount_sat: Option<u64>,
    security_deposit_pct: Option<u64>,
    payment_method: Option<FiatPaymentMethod>,
    maker_address: Option<Url>,
    maker_msg_pubkey: Option<XOnlyPublicKey>,
    arbitrator: Option<ArbitratorInfo>,
}

impl OfferBuilder {
    pub fn new() -> Self {
        Self {
            offer_uuid: None,
            direction: None,
            price: None,
            currency: None,
            min_amount_sat: None,
            max_amount_sat: None,
            security_deposit_pct: None,
            payment_method: None,
            maker_address: None,
            maker_msg_pubkey: None,
            arbitrator: None,
        }
    }

    pub fn offer_uuid(&mut self, offer_uuid: impl Into<Uuid>) -> &mut Self {
        self.offer_uuid = Some(offer_uuid.into());
        self
    }

    pub fn direction(&mut self, direction: impl Into<Direction>) -> &mut Self {
        self.direction = Some(direction.into());
        self
    }

    pub fn price(&mut self, price: impl Into<PriceSpec>) -> &mut Self {
        self.price = Some(price.into());
        self
    }

    pub fn currency(&mut self, currency: impl Into<Currency>) -> &mut Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn amount_range_sat(&mut self, min_sat: u64, max_sat: u64) -> &mut Self {
        self.min_amount_sat = Some(min_sat);
        self.max_amount_sat = Some(max_sat);
        self
    }

    pub fn security_deposit_pct(&mut self, security_deposit_pct: impl Into<u64>) -> &mut Self {
        self.security_deposit_pct = Some(security_deposit_pct.into());
        self
    }

    pub fn payment_method(&mut self, payment_method: impl Into<FiatPaymentMethod>) -> &mut Self {
        self.payment_method = Some(payment_method.into());
        self
    }

    pub fn maker_address(&mut self, maker_address: impl Into<Url>) -> &mut Self {
        self.maker_address = Some(maker_address.into());
        self
    }

    pub fn maker_msg_pubkey(&mut self, maker_msg_pubkey: impl Into<XOnlyPublicKey>) -> &mut Self {
        self.maker_msg_pubkey = Some(maker_msg_pubkey.into());
        self
    }

    pub fn arbitrator(&mut self, arbitrator: impl Into<ArbitratorInfo>) -> &mut Self {
        self.arbitrator = Some(arbitrator.into());
        self
    }

    pub fn build(&self) -> Result<Offer, SwapError> {
        let offer_uuid = if let Some(explicit_uuid) = self.offer_uuid.as_ref() {
            explicit_uuid.to_owned()
        } else {
            Uuid::new_v4()
        };

        let Some(direction) = self.direction.as_ref() else {
            return Err(SwapError::Simple("No Direction defined".to_string()));
        };

        let Some(price) = self.price.as_ref() else {
            return Err(SwapError::Simple("No Price defined".to_string()));
        };

        let Some(currency) = self.currency.as_ref() else {
            return Err(SwapError::Simple("No Currency defined".to_string()));
        };

        let Some(min_amount_sat) = self.min_amount_sat else {
            return Err(SwapError::Simple("No Amount Range defined".to_string()));
        };

        let Some(max_amount_sat) = self.max_amount_sat else {
            return Err(SwapError::Simple("No Amount Range defined".to_string()));
        };

        if min_amount_sat == 0 || min_amount_sat > max_amount_sat {
            return Err(SwapError::Simple(format!(
                "Invalid Amount Range {} - {}",
                min_amount_sat, max_amount_sat
            )));
        }

        let Some(security_deposit_pct) = self.security_deposit_pct else {
            return Err(SwapError::Simple(
                "No Security Deposit Percentage defined".to_string(),
            ));
        };

        let Some(payment_method) = self.payment_method.as_ref() else {
            return Err(SwapError::Simple("No Payment Method defined".to_string()));
        };

        let Some(maker_address) = self.maker_address.as_ref() else {
            return Err(SwapError::Simple("No Maker Address defined".to_string()));
        };

        let Some(maker_msg_pubkey) = self.maker_msg_pubkey.as_ref() else {
            return Err(SwapError::Simple("No Maker Pubkey defined".to_string()));
        };

        let Some(arbitrator) = self.arbitrator.as_ref() else {
            return Err(SwapError::Simple("No Arbitrator defined".to_string()));
        };

        let offer = Offer {
            offer_uuid,
            direction: direction.to_owned(),
            price: price.to_owned(),
            currency: currency.to_owned(),
            min_amount_sat,
            max_amount_sat,
            security_deposit_pct,
            payment_method: payment_method.to_owned(),
            maker_address: maker_address.to_owned(),
            maker_msg_pubkey: maker_msg_pubkey.to_owned(),
            arbitrator: arbitrator.to_owned(),
            protocol_version: PROTOCOL_VERSION,
        };

        Ok(offer)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::SomeTestOfferParams;

    use super::*;

    #[test]
    fn builder_requires_amount_range() {
        let mut builder = SomeTestOfferParams::default_builder();
        builder.amount_range_sat(2_000_000, 1_000_000);
        assert!(builder.build().is_err());
    }

    #[test]
    fn builder_generates_uuid_when_unset() {
        let offer_a = SomeTestOfferParams::default_builder().build().unwrap();
        let offer_b = SomeTestOfferParams::default_builder().build().unwrap();
        assert_ne!(offer_a.offer_uuid, offer_b.offer_uuid);
    }
}
