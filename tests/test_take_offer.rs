mod common;

#[cfg(test)]
mod take_offer_tests {
    use iso_currency::Currency;

    use satswap::common::error::{SwapError, TakeOfferRejectReason};
    use satswap::common::types::{Direction, FiatPaymentMethod, PriceSpec};
    use satswap::testing::{InMemoryHub, SomeTestOfferParams, TestWitness};

    use super::common;

    #[tokio::test]
    async fn test_local_policy_rejects_before_any_network_call() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let maker = common::start_node(
            "maker",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("maker"),
        )
        .await;
        let taker = common::start_node(
            "taker",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("taker"),
        )
        .await;

        let offer = common::default_offer(&maker);
        maker.manager.publish_offer(offer.clone()).await.unwrap();

        // Below the offer's minimum amount
        assert!(matches!(
            taker.manager.take_offer(offer.clone(), 100).await,
            Err(SwapError::Rejected(TakeOfferRejectReason::AmountOutOfRange))
        ));
        assert!(matches!(
            taker.manager.take_offer(offer.clone(), 3_000_000).await,
            Err(SwapError::Rejected(TakeOfferRejectReason::AmountOutOfRange))
        ));

        // Banned payment method, then banned currency which is checked earlier
        taker.manager.ban_payment_method(FiatPaymentMethod::Zelle);
        assert!(matches!(
            taker
                .manager
                .take_offer(offer.clone(), SomeTestOfferParams::TRADE_AMOUNT_SAT)
                .await,
            Err(SwapError::Rejected(
                TakeOfferRejectReason::BannedPaymentMethod
            ))
        ));
        taker.manager.ban_currency(Currency::USD);
        assert!(matches!(
            taker
                .manager
                .take_offer(offer.clone(), SomeTestOfferParams::TRADE_AMOUNT_SAT)
                .await,
            Err(SwapError::Rejected(TakeOfferRejectReason::BannedCurrency))
        ));

        // A fresh taker that only banned the maker's address
        let wary = common::start_node(
            "wary",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("wary"),
        )
        .await;
        wary.manager.ban_peer(maker.address.clone());
        assert!(matches!(
            wary.manager
                .take_offer(offer.clone(), SomeTestOfferParams::TRADE_AMOUNT_SAT)
                .await,
            Err(SwapError::Rejected(
                TakeOfferRejectReason::BannedNodeAddress
            ))
        ));

        // Nothing reached the Maker; the offer is still advertised
        assert_eq!(maker.manager.advertised_offers().await.len(), 1);

        maker.teardown().await;
        taker.teardown().await;
        wary.teardown().await;
    }

    #[tokio::test]
    async fn test_market_margin_offers_cannot_be_taken() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let maker = common::start_node(
            "maker",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("maker"),
        )
        .await;
        let taker = common::start_node(
            "taker",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("taker"),
        )
        .await;

        let mut builder = maker.manager.new_offer_builder();
        builder
            .direction(Direction::Buy)
            .price(PriceSpec::MarketMargin { basis_points: 150 })
            .currency(Currency::USD)
            .amount_range_sat(500_000, 2_000_000)
            .security_deposit_pct(10u64)
            .payment_method(FiatPaymentMethod::Zelle)
            .arbitrator(SomeTestOfferParams::some_arbitrator());
        let offer = builder.build().unwrap();
        maker.manager.publish_offer(offer.clone()).await.unwrap();

        assert!(matches!(
            taker
                .manager
                .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
                .await,
            Err(SwapError::Simple(_))
        ));

        maker.teardown().await;
        taker.teardown().await;
    }

    #[tokio::test]
    async fn test_maker_side_ban_makes_offer_unavailable() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let maker = common::start_node(
            "maker",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("maker"),
        )
        .await;
        let taker = common::start_node(
            "taker",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("taker"),
        )
        .await;

        let offer = common::default_offer(&maker);
        maker.manager.publish_offer(offer.clone()).await.unwrap();
        maker.manager.ban_peer(taker.address.clone());

        assert!(matches!(
            taker
                .manager
                .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
                .await,
            Err(SwapError::OfferUnavailable(_))
        ));

        // The banned taker did not consume the reservation
        assert_eq!(maker.manager.advertised_offers().await.len(), 1);

        maker.teardown().await;
        taker.teardown().await;
    }

    #[tokio::test]
    async fn test_concurrent_takers_race_for_one_reservation() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let maker = common::start_node(
            "maker",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("maker"),
        )
        .await;
        let alice = common::start_node(
            "alice",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("alice"),
        )
        .await;
        let bob = common::start_node(
            "bob",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("bob"),
        )
        .await;

        let offer = common::default_offer(&maker);
        maker.manager.publish_offer(offer.clone()).await.unwrap();

        let (alice_result, bob_result) = tokio::join!(
            alice
                .manager
                .take_offer(offer.clone(), SomeTestOfferParams::TRADE_AMOUNT_SAT),
            bob.manager
                .take_offer(offer.clone(), SomeTestOfferParams::TRADE_AMOUNT_SAT),
        );

        // Exactly one taker wins the check-and-set inside the registry actor
        assert_eq!(
            alice_result.is_ok() as u32 + bob_result.is_ok() as u32,
            1,
            "exactly one of the racing takers must win the reservation"
        );
        let loser_result = if alice_result.is_ok() {
            bob_result
        } else {
            alice_result
        };
        assert!(matches!(loser_result, Err(SwapError::OfferUnavailable(_))));

        // The reservation removed the offer from the advertised book, so a
        // late third party is turned away the same way
        assert!(maker.manager.advertised_offers().await.is_empty());
        let charlie = common::start_node(
            "charlie",
            &hub,
            &witness,
            common::test_config(),
            common::funded_wallet("charlie"),
        )
        .await;
        assert!(matches!(
            charlie
                .manager
                .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
                .await,
            Err(SwapError::OfferUnavailable(_))
        ));

        maker.teardown().await;
        alice.teardown().await;
        bob.teardown().await;
        charlie.teardown().await;
    }
}
