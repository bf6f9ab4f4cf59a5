#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use iso_currency::Currency;
use tokio::time::{sleep, Instant};
use url::Url;
use uuid::Uuid;

use satswap::common::types::{
    BankAccountDetails, Direction, EngineConfig, FiatPaymentMethod, PriceSpec,
};
use satswap::manager::{Manager, NodeProfile, PaymentAccount};
use satswap::offer::Offer;
use satswap::testing::{InMemoryHub, SomeTestOfferParams, TestWallet, TestWitness};
use satswap::trade::{TradeAccess, TradeState};

pub const FEE_PER_VBYTE: u64 = 10;
pub const WAIT_DEADLINE: Duration = Duration::from_secs(5);

pub fn test_config() -> EngineConfig {
    EngineConfig {
        request_timeout: Duration::from_secs(5),
        fee_poll_interval: Duration::from_millis(50),
        min_fee_broadcast_peers: 1,
        max_broadcast_attempts: 3,
        take_offer_fee_sat: 20_000,
    }
}

pub fn funded_wallet(label: &str) -> TestWallet {
    TestWallet::new(label, FEE_PER_VBYTE, vec![1_500_000, 1_500_000, 1_500_000])
}

pub struct TestNode {
    pub manager: Manager,
    pub address: Url,
    pub data_dir: PathBuf,
}

impl TestNode {
    pub async fn teardown(self) {
        self.manager.shutdown().await.unwrap();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

pub async fn start_node(
    label: &str,
    hub: &Arc<InMemoryHub>,
    witness: &Arc<TestWitness>,
    config: EngineConfig,
    wallet: TestWallet,
) -> TestNode {
    let address = Url::parse(&format!("tcp://{}-node.test:3340", label)).unwrap();
    let profile = NodeProfile {
        keypair: SomeTestOfferParams::some_keypair(),
        address: address.clone(),
        payment_account: Some(PaymentAccount {
            account_id: format!("{}-acct", label),
            method: FiatPaymentMethod::Zelle,
            currency: Currency::USD,
            details: Box::new(BankAccountDetails {
                holder_name: format!("{} Holder", label),
                account_no: "12345678".to_string(),
                bank_id: "21000021".to_string(),
            }),
        }),
    };
    let data_dir = std::env::temp_dir().join(format!("satswap-test-{}-{}", label, Uuid::new_v4()));

    let manager = Manager::new(
        profile,
        hub.endpoint(address.clone()),
        Box::new(wallet),
        witness.clone(),
        &data_dir,
        config,
    )
    .await
    .unwrap();

    TestNode {
        manager,
        address,
        data_dir,
    }
}

/// Offer published by `node`: Maker buys 0.005 - 0.02 BTC worth of sats for
/// USD over Zelle with a 10% security deposit.
pub fn default_offer(node: &TestNode) -> Offer {
    let mut builder = node.manager.new_offer_builder();
    builder
        .direction(Direction::Buy)
        .price(PriceSpec::Fixed {
            price: SomeTestOfferParams::TRADE_PRICE,
        })
        .currency(Currency::USD)
        .amount_range_sat(500_000, 2_000_000)
        .security_deposit_pct(10u64)
        .payment_method(FiatPaymentMethod::Zelle)
        .arbitrator(SomeTestOfferParams::some_arbitrator());
    builder.build().unwrap()
}

/// Fee tx id as the `TestWallet` with this label mints it.
pub fn fee_tx_id_for(label: &str, trade_uuid: Uuid) -> String {
    format!("{}-fee-tx-{}", label, trade_uuid)
}

pub async fn wait_for_state(access: &TradeAccess, want: TradeState) {
    let deadline = Instant::now() + WAIT_DEADLINE;
    loop {
        let state = access.state().await;
        if state == want {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for state {}, still in {}",
            want,
            state
        );
        sleep(Duration::from_millis(10)).await;
    }
}

/// The Maker side trade actor is spawned asynchronously off the reservation
/// notification, so tests poll for its accessor.
pub async fn maker_trade_access(manager: &Manager, trade_uuid: Uuid) -> TradeAccess {
    let deadline = Instant::now() + WAIT_DEADLINE;
    loop {
        if let Some(access) = manager.trade_access(trade_uuid).await {
            return access;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for Maker trade actor of {}",
            trade_uuid
        );
        sleep(Duration::from_millis(10)).await;
    }
}
