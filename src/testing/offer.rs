use iso_currency::Currency;
use secp256k1::{rand::rngs::OsRng, KeyPair, Secp256k1, XOnlyPublicKey};
use url::Url;

use crate::common::types::{ArbitratorInfo, Direction, FiatPaymentMethod, PriceSpec};
use crate::offer::OfferBuilder;

pub struct SomeTestOfferParams {}

impl SomeTestOfferParams {
    pub const TRADE_AMOUNT_SAT: u64 = 1_000_000;
    pub const TRADE_PRICE: u64 = 50_000;

    pub fn some_keypair() -> KeyPair {
        let secp = Secp256k1::new();
        KeyPair::new(&secp, &mut OsRng)
    }

    pub fn some_pubkey() -> XOnlyPublicKey {
        XOnlyPublicKey::from_keypair(&Self::some_keypair()).0
    }

    pub fn some_arbitrator() -> ArbitratorInfo {
        ArbitratorInfo {
            address: Url::parse("tcp://arbitrator-node.test:3340").unwrap(),
            pubkey: Self::some_pubkey(),
        }
    }

    /// Maker buys Bitcoin for USD over Zelle, 10% security deposit, with an
    /// amount range spanning the canonical 1,000,000 sat test trade.
    pub fn default_builder() -> OfferBuilder {
        let mut builder = OfferBuilder::new();
        builder
            .direction(Direction::Buy)
            .price(PriceSpec::Fixed {
                price: Self::TRADE_PRICE,
            })
            .currency(Currency::USD)
            .amount_range_sat(500_000, 2_000_000)
            .security_deposit_pct(10u64)
            .payment_method(FiatPaymentMethod::Zelle)
            .maker_address(Url::parse("tcp://maker-node.test:3340").unwrap())
            .maker_msg_pubkey(Self::some_pubkey())
            .arbitrator(Self::some_arbitrator());
        builder
    }
}
