mod common;

#[cfg(test)]
mod failure_tests {
    use std::time::Duration;

    use secp256k1::hashes::sha256;
    use secp256k1::rand::rngs::OsRng;
    use secp256k1::{KeyPair, Message, Secp256k1, XOnlyPublicKey};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use url::Url;
    use uuid::Uuid;

    use satswap::collaborator::transport::PeerTransport;
    use satswap::common::error::SwapError;
    use satswap::common::types::BankAccountDetails;
    use satswap::deposit::{PartialSignature, RawInputs};
    use satswap::message::{MessageEnvelope, TradeMessage};
    use satswap::testing::{InMemoryHub, SomeTestOfferParams, TestWallet, TestWitness};
    use satswap::trade::TradeState;

    use super::common;

    #[tokio::test]
    async fn test_availability_check_times_out_against_silent_maker() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let mut config = common::test_config();
        config.request_timeout = Duration::from_millis(300);
        let taker =
            common::start_node("taker", &hub, &witness, config, common::funded_wallet("taker"))
                .await;

        // A node that is on the network but never answers availability
        // requests
        let ghost_address = Url::parse("tcp://ghost-node.test:3340").unwrap();
        let _ghost_endpoint = hub.endpoint(ghost_address.clone());

        let mut builder = SomeTestOfferParams::default_builder();
        builder.maker_address(ghost_address);
        let offer = builder.build().unwrap();

        let result = taker
            .manager
            .take_offer(offer.clone(), SomeTestOfferParams::TRADE_AMOUNT_SAT)
            .await;
        assert!(matches!(result, Err(SwapError::Timeout(_))));
        assert!(taker.manager.trade_access(offer.offer_uuid).await.is_none());

        // A peer missing from the network entirely fails fast with a
        // transport fault instead of waiting out the timeout
        let mut builder = SomeTestOfferParams::default_builder();
        builder.maker_address(Url::parse("tcp://nowhere-node.test:3340").unwrap());
        let unreachable_offer = builder.build().unwrap();
        assert!(matches!(
            taker
                .manager
                .take_offer(unreachable_offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
                .await,
            Err(SwapError::Transport(_))
        ));

        taker.teardown().await;
    }

    /// A Maker answering after the Taker already gave up must not disturb a
    /// later retry. The late answer carries the old nonce and says the offer
    /// is gone; only the fresh-nonce answer may settle the retry.
    #[tokio::test]
    async fn test_late_availability_response_after_timeout_is_ignored() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let mut config = common::test_config();
        config.request_timeout = Duration::from_millis(300);
        let taker =
            common::start_node("taker", &hub, &witness, config, common::funded_wallet("taker"))
                .await;

        let slow_address = Url::parse("tcp://slow-node.test:3340").unwrap();
        let slow_endpoint = hub.endpoint(slow_address.clone());
        let mut builder = SomeTestOfferParams::default_builder();
        builder.maker_address(slow_address.clone());
        let offer = builder.build().unwrap();
        let trade_uuid = offer.offer_uuid;

        let (msg_tx, mut msg_rx) = mpsc::channel::<MessageEnvelope>(10);
        slow_endpoint.register_trade_tx(trade_uuid, msg_tx);

        // First attempt: the Maker sits on the request until the Taker's
        // deadline passes
        let result = taker
            .manager
            .take_offer(offer.clone(), SomeTestOfferParams::TRADE_AMOUNT_SAT)
            .await;
        assert!(matches!(result, Err(SwapError::Timeout(_))));
        let first_request = timeout(common::WAIT_DEADLINE, msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let stale_nonce = first_request.nonce.unwrap();

        // Answer the retry, but lead with the abandoned request's answer
        let taker_address = taker.address.clone();
        let responder_endpoint = slow_endpoint.clone();
        tokio::spawn(async move {
            let second_request = msg_rx.recv().await.unwrap();
            let fresh_nonce = second_request.nonce.unwrap();
            assert_ne!(stale_nonce, fresh_nonce);

            let respond = |available: bool, nonce: Uuid| MessageEnvelope {
                trade_uuid,
                nonce: Some(nonce),
                sender: slow_address.clone(),
                message: TradeMessage::AvailabilityResponse { available },
            };
            responder_endpoint
                .send_message(taker_address.clone(), respond(false, stale_nonce))
                .await
                .unwrap()
                .unwrap();
            responder_endpoint
                .send_message(taker_address, respond(true, fresh_nonce))
                .await
                .unwrap()
                .unwrap();
        });

        // The stale "unavailable" answer is dropped; the retry settles on the
        // genuine one
        taker
            .manager
            .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
            .await
            .unwrap();

        taker.teardown().await;
    }

    #[tokio::test]
    async fn test_underfunded_taker_fails_at_deposit_building() {
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
        let broke = common::start_node(
            "broke",
            &hub,
            &witness,
            common::test_config(),
            TestWallet::new("broke", common::FEE_PER_VBYTE, vec![50_000]),
        )
        .await;

        let offer = common::default_offer(&maker);
        let trade_uuid = offer.offer_uuid;
        maker.manager.publish_offer(offer.clone()).await.unwrap();
        witness.set_broadcast_peer_count(&common::fee_tx_id_for("broke", trade_uuid), 3);

        let taker_access = broke
            .manager
            .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
            .await
            .unwrap();

        // The Maker validates the fee and requests the deposit; coin
        // selection on the taker side cannot cover amount + security deposit
        // + half the fee
        common::wait_for_state(&taker_access, TradeState::Failed).await;
        let fail_reason = taker_access.summary().await.fail_reason.unwrap();
        assert!(fail_reason.contains("Insufficient funds"), "{}", fail_reason);

        maker.teardown().await;
        broke.teardown().await;
    }

    #[tokio::test]
    async fn test_deposit_broadcast_retries_through_transient_failures() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let mut maker_wallet = common::funded_wallet("maker");
        maker_wallet.fail_deposit_broadcasts(2);
        let maker =
            common::start_node("maker", &hub, &witness, common::test_config(), maker_wallet)
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
        let trade_uuid = offer.offer_uuid;
        maker.manager.publish_offer(offer.clone()).await.unwrap();
        witness.set_broadcast_peer_count(&common::fee_tx_id_for("taker", trade_uuid), 3);

        let taker_access = taker
            .manager
            .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
            .await
            .unwrap();
        let maker_access = common::maker_trade_access(&maker.manager, trade_uuid).await;

        // Two scripted failures are absorbed within the three-attempt budget
        common::wait_for_state(&maker_access, TradeState::DepositTxPublished).await;
        common::wait_for_state(&taker_access, TradeState::DepositTxPublished).await;

        maker.teardown().await;
        taker.teardown().await;
    }

    #[tokio::test]
    async fn test_deposit_broadcast_exhaustion_fails_the_trade() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let mut maker_wallet = common::funded_wallet("maker");
        maker_wallet.fail_deposit_broadcasts(3);
        let maker =
            common::start_node("maker", &hub, &witness, common::test_config(), maker_wallet)
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
        let trade_uuid = offer.offer_uuid;
        maker.manager.publish_offer(offer.clone()).await.unwrap();
        witness.set_broadcast_peer_count(&common::fee_tx_id_for("taker", trade_uuid), 3);

        let _taker_access = taker
            .manager
            .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
            .await
            .unwrap();
        let maker_access = common::maker_trade_access(&maker.manager, trade_uuid).await;

        common::wait_for_state(&maker_access, TradeState::Failed).await;
        let fail_reason = maker_access.summary().await.fail_reason.unwrap();
        assert!(fail_reason.contains("after 3 attempts"), "{}", fail_reason);

        // The failed trade closed its offer
        assert!(maker.manager.advertised_offers().await.is_empty());

        maker.teardown().await;
        taker.teardown().await;
    }

    /// Drives the taker side of the protocol by hand to present the Maker
    /// with a contract that does not match its local derivation.
    #[tokio::test]
    async fn test_maker_aborts_on_contract_mismatch_before_signing() {
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

        let offer = common::default_offer(&maker);
        let trade_uuid = offer.offer_uuid;
        maker.manager.publish_offer(offer.clone()).await.unwrap();

        let secp = Secp256k1::new();
        let evil_keypair = KeyPair::new(&secp, &mut OsRng);
        let evil_pubkey = XOnlyPublicKey::from_keypair(&evil_keypair).0;
        let evil_address = Url::parse("tcp://evil-node.test:3340").unwrap();
        let evil_endpoint = hub.endpoint(evil_address.clone());

        let (msg_tx, mut msg_rx) = mpsc::channel::<MessageEnvelope>(10);
        evil_endpoint.register_trade_tx(trade_uuid, msg_tx);

        let send = |message: TradeMessage, nonce: Option<Uuid>| {
            let envelope = MessageEnvelope {
                trade_uuid,
                nonce,
                sender: evil_address.clone(),
                message,
            };
            evil_endpoint.send_message(offer.maker_address.clone(), envelope)
        };
        let nonce = Uuid::new_v4();
        send(
            TradeMessage::AvailabilityRequest {
                taker_pubkey: evil_pubkey,
            },
            Some(nonce),
        )
        .await
        .unwrap()
        .unwrap();

        let response = timeout(common::WAIT_DEADLINE, msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            response.message,
            TradeMessage::AvailabilityResponse { available: true }
        ));

        witness.set_broadcast_peer_count("evil-fee-tx", 3);
        send(
            TradeMessage::TakeOfferFeePayed {
                fee_tx_id: "evil-fee-tx".to_string(),
                trade_amount_sat: SomeTestOfferParams::TRADE_AMOUNT_SAT,
                trade_price: SomeTestOfferParams::TRADE_PRICE,
                taker_pubkey: evil_pubkey,
                taker_multisig_pubkey: evil_pubkey,
            },
            None,
        )
        .await
        .unwrap()
        .unwrap();

        let request = timeout(common::WAIT_DEADLINE, msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            request.message,
            TradeMessage::RequestDepositPayment { .. }
        ));

        // A contract whose bytes cannot match the Maker's local derivation,
        // with a signature over something else entirely
        let garbage_sig = secp.sign_schnorr(
            &Message::from_hashed_data::<sha256::Hash>(b"not the contract"),
            &evil_keypair,
        );
        send(
            TradeMessage::DepositPayment {
                account_id: "evil-acct".to_string(),
                payment_details: Box::new(BankAccountDetails {
                    holder_name: "Evil Holder".to_string(),
                    account_no: "66666666".to_string(),
                    bank_id: "21000021".to_string(),
                }),
                msg_pubkey: evil_pubkey,
                multisig_pubkey: evil_pubkey,
                payout_address: "evil-payout".to_string(),
                contract_json: "{}".to_string(),
                contract_sig: garbage_sig,
                my_inputs: RawInputs {
                    utxos: vec![],
                    change: None,
                },
                my_partial_sig: PartialSignature {
                    signer_pubkey: evil_pubkey,
                    input_sigs: vec![],
                },
            },
            None,
        )
        .await
        .unwrap()
        .unwrap();

        let maker_access = common::maker_trade_access(&maker.manager, trade_uuid).await;
        common::wait_for_state(&maker_access, TradeState::Failed).await;
        let fail_reason = maker_access.summary().await.fail_reason.unwrap();
        assert!(fail_reason.contains("ContractMismatch"), "{}", fail_reason);

        maker.teardown().await;
    }

    /// Takes an offer by hand and goes silent right after the Maker commits
    /// inputs to the deposit. The Maker must escalate to a dispute rather
    /// than fail the trade outright.
    #[tokio::test]
    async fn test_silent_peer_after_deposit_handshake_escalates_to_dispute() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let mut config = common::test_config();
        config.request_timeout = Duration::from_millis(500);
        let maker =
            common::start_node("maker", &hub, &witness, config, common::funded_wallet("maker"))
                .await;

        let offer = common::default_offer(&maker);
        let trade_uuid = offer.offer_uuid;
        maker.manager.publish_offer(offer.clone()).await.unwrap();

        let secp = Secp256k1::new();
        let silent_keypair = KeyPair::new(&secp, &mut OsRng);
        let silent_pubkey = XOnlyPublicKey::from_keypair(&silent_keypair).0;
        let silent_address = Url::parse("tcp://silent-node.test:3340").unwrap();
        let silent_endpoint = hub.endpoint(silent_address.clone());

        let (msg_tx, mut msg_rx) = mpsc::channel::<MessageEnvelope>(10);
        silent_endpoint.register_trade_tx(trade_uuid, msg_tx);

        let send = |message: TradeMessage, nonce: Option<Uuid>| {
            let envelope = MessageEnvelope {
                trade_uuid,
                nonce,
                sender: silent_address.clone(),
                message,
            };
            silent_endpoint.send_message(offer.maker_address.clone(), envelope)
        };
        send(
            TradeMessage::AvailabilityRequest {
                taker_pubkey: silent_pubkey,
            },
            Some(Uuid::new_v4()),
        )
        .await
        .unwrap()
        .unwrap();
        let response = timeout(common::WAIT_DEADLINE, msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            response.message,
            TradeMessage::AvailabilityResponse { available: true }
        ));

        witness.set_broadcast_peer_count("silent-fee-tx", 3);
        send(
            TradeMessage::TakeOfferFeePayed {
                fee_tx_id: "silent-fee-tx".to_string(),
                trade_amount_sat: SomeTestOfferParams::TRADE_AMOUNT_SAT,
                trade_price: SomeTestOfferParams::TRADE_PRICE,
                taker_pubkey: silent_pubkey,
                taker_multisig_pubkey: silent_pubkey,
            },
            None,
        )
        .await
        .unwrap()
        .unwrap();

        // The Maker has now built its side of the deposit and is waiting for
        // ours. Never answer.
        let request = timeout(common::WAIT_DEADLINE, msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            request.message,
            TradeMessage::RequestDepositPayment { .. }
        ));

        let maker_access = common::maker_trade_access(&maker.manager, trade_uuid).await;
        common::wait_for_state(&maker_access, TradeState::Disputed).await;
        let fail_reason = maker_access.summary().await.fail_reason.unwrap();
        assert!(
            fail_reason.contains("Timed out waiting for DepositPayment"),
            "{}",
            fail_reason
        );

        // The silent side is told the trade went to arbitration
        let notice = timeout(common::WAIT_DEADLINE, msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(notice.message, TradeMessage::Dispute { .. }));
        assert!(maker.manager.advertised_offers().await.is_empty());

        maker.teardown().await;
    }

    #[tokio::test]
    async fn test_both_sides_fail_when_fee_never_propagates() {
        let _trace_sub = tracing_subscriber::fmt::try_init();

        let hub = InMemoryHub::new();
        let witness = TestWitness::new();
        let mut config = common::test_config();
        config.request_timeout = Duration::from_millis(400);
        let maker = common::start_node(
            "maker",
            &hub,
            &witness,
            config.clone(),
            common::funded_wallet("maker"),
        )
        .await;
        let taker =
            common::start_node("taker", &hub, &witness, config, common::funded_wallet("taker"))
                .await;

        let offer = common::default_offer(&maker);
        let trade_uuid = offer.offer_uuid;
        maker.manager.publish_offer(offer.clone()).await.unwrap();

        // The taker pays the fee but the network never relays it widely
        // enough
        let taker_access = taker
            .manager
            .take_offer(offer, SomeTestOfferParams::TRADE_AMOUNT_SAT)
            .await
            .unwrap();
        let maker_access = common::maker_trade_access(&maker.manager, trade_uuid).await;

        common::wait_for_state(&maker_access, TradeState::Failed).await;
        let fail_reason = maker_access.summary().await.fail_reason.unwrap();
        assert!(fail_reason.contains("Timed out"), "{}", fail_reason);

        // The taker side times out on its own deadline as well
        common::wait_for_state(&taker_access, TradeState::Failed).await;

        maker.teardown().await;
        taker.teardown().await;
    }
}
