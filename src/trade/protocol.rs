use secp256k1::schnorr::Signature;
use secp256k1::XOnlyPublicKey;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborator::witness::ConfidenceEvent;
use crate::common::{
    error::SwapError,
    types::{Direction, PriceSpec, TxIdString},
};
use crate::contract::{Contract, ContractParty};
use crate::deposit::{
    DepositCoordinator, MultisigScript, PartialSignature, PayoutTx, RawInputs, SignedDepositTx,
    SignedPayoutTx,
};
use crate::message::{MessageEnvelope, TradeMessage};

use super::state::{TradeRole, TradeState};
use super::trade::{TradeActor, TradeNotif, TradeRequest};

/// Protocol semantics of the trade actor. The split from `trade.rs` keeps
/// actor plumbing and trade logic apart; both impl blocks are one type.
impl TradeActor {
    pub(super) async fn on_start(&mut self) {
        match self.data.role() {
            TradeRole::Maker => {
                self.arm_timeout("TakeOfferFeePayed");
            }
            TradeRole::Taker => {
                if let Some(error) = self.taker_kickoff().await.err() {
                    self.fail_trade(error.to_string()).await;
                }
            }
        }
    }

    pub(super) async fn on_resume(&mut self) {
        let state = self.data.state();
        info!(
            "Trade w/ TradeUUID {} resuming as {} in state {}",
            self.data.trade_uuid,
            self.data.role(),
            state
        );
        if state.is_terminal() {
            return;
        }

        if let Some(deposit_tx_id) = self.data.deposit_tx_id() {
            if matches!(
                state,
                TradeState::DepositTxPublished
                    | TradeState::DepositConfirmed
                    | TradeState::FiatSent
                    | TradeState::FiatReceivedConfirmed
            ) {
                self.context
                    .witness
                    .subscribe_confidence(&deposit_tx_id, self.confidence_tx.clone());
            }
        }

        match (self.data.role(), state) {
            (TradeRole::Maker, TradeState::Init) => {
                if self.data.fee_tx_id().is_some() {
                    self.arm_timeout("take-offer fee network propagation");
                    self.start_fee_polling().await;
                } else {
                    self.arm_timeout("TakeOfferFeePayed");
                }
            }
            (TradeRole::Taker, TradeState::AvailabilityChecked) => {
                // Persisted before the fee payment went out; start over
                if let Some(error) = self.taker_kickoff().await.err() {
                    self.fail_trade(error.to_string()).await;
                }
            }
            (TradeRole::Taker, TradeState::TakeOfferFeeValidated) => {
                self.arm_timeout("RequestDepositPayment");
            }
            (TradeRole::Maker, TradeState::DepositTxBuilt) => {
                self.arm_timeout("DepositPayment");
            }
            (TradeRole::Maker, TradeState::DepositTxSigned) => {
                if let Some(error) = self.maker_publish_deposit().await.err() {
                    self.fail_trade(error.to_string()).await;
                }
            }
            (TradeRole::Taker, TradeState::DepositTxSigned) => {
                self.arm_timeout("DepositTxPublished");
            }
            (TradeRole::Maker, TradeState::FiatReceivedConfirmed) => {
                if self.data.payout_tx().is_some() {
                    // Payout proposal may not have reached the peer; resend
                    if let Some(error) = self.maker_send_payout().await.err() {
                        self.fail_trade(error.to_string()).await;
                    }
                }
            }
            (TradeRole::Taker, TradeState::FiatReceivedConfirmed) => {
                self.arm_timeout("SignedPayoutTx");
            }
            _ => {}
        }
    }

    // Shared helpers

    /// The fiat payer is the Bitcoin buyer: the Maker of a Buy offer, or the
    /// Taker of a Sell offer.
    fn is_fiat_payer(&self) -> bool {
        let maker_buys = self.data.offer().direction == Direction::Buy;
        match self.data.role() {
            TradeRole::Maker => maker_buys,
            TradeRole::Taker => !maker_buys,
        }
    }

    fn my_party(&self) -> ContractParty {
        ContractParty {
            account_id: self.context.account_id.clone(),
            payment_details: self.context.payment_details.clone(),
            msg_pubkey: self.my_msg_pubkey(),
        }
    }

    /// Both sides derive the coordinator from agreed terms only, so every
    /// quantity it computes must come out identical on both sides.
    fn coordinator(&self) -> Result<DepositCoordinator, SwapError> {
        let offer = self.data.offer();
        let my_pubkey = self.data.my_multisig_pubkey().ok_or_else(|| {
            SwapError::Simple("Own multisig pubkey not yet established".to_string())
        })?;
        let peer_pubkey = self.data.peer_multisig_pubkey().ok_or_else(|| {
            SwapError::Simple("Peer multisig pubkey not yet established".to_string())
        })?;
        let fee_per_vbyte = self
            .data
            .fee_per_vbyte()
            .ok_or_else(|| SwapError::Simple("Deposit fee rate not yet agreed".to_string()))?;

        let (maker_pubkey, taker_pubkey) = match self.data.role() {
            TradeRole::Maker => (my_pubkey, peer_pubkey),
            TradeRole::Taker => (peer_pubkey, my_pubkey),
        };
        let multisig_script = MultisigScript {
            maker_pubkey,
            taker_pubkey,
            arbitrator_pubkey: offer.arbitrator.pubkey,
        };

        let trade_amount_sat = self.data.trade_amount_sat();
        let security_deposit_sat = offer.security_deposit_sat(trade_amount_sat);
        Ok(DepositCoordinator::new(
            multisig_script,
            trade_amount_sat,
            security_deposit_sat,
            fee_per_vbyte,
        ))
    }

    /// Builds the contract from local state only. Peer-supplied fields enter
    /// through what was stored when the corresponding message was verified.
    fn local_contract(&self) -> Result<Contract, SwapError> {
        let peer_party = self
            .data
            .peer_party()
            .ok_or_else(|| SwapError::Simple("Peer party not yet established".to_string()))?;
        let fee_tx_id = self
            .data
            .fee_tx_id()
            .ok_or_else(|| SwapError::Simple("Take-offer fee tx not yet known".to_string()))?;

        let (maker_party, taker_party) = match self.data.role() {
            TradeRole::Maker => (self.my_party(), peer_party),
            TradeRole::Taker => (peer_party, self.my_party()),
        };
        Ok(Contract::from_terms(
            self.data.trade_uuid,
            self.data.trade_amount_sat(),
            self.data.trade_price(),
            fee_tx_id,
            maker_party,
            taker_party,
        ))
    }

    fn send_to_peer(&self, message: TradeMessage) {
        let msg_type: &'static str = (&message).into();
        let envelope = MessageEnvelope {
            trade_uuid: self.data.trade_uuid,
            nonce: None,
            sender: self.context.own_address.clone(),
            message,
        };
        debug!(
            "Trade w/ TradeUUID {} sending {} to peer {}",
            self.data.trade_uuid,
            msg_type,
            self.data.peer_address()
        );
        let receipt_rx = self
            .context
            .transport
            .send_message(self.data.peer_address(), envelope);
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            if let Ok(Err(fault)) = receipt_rx.await {
                let _ = self_tx
                    .send(TradeRequest::SendFault {
                        description: format!("{} - {}", msg_type, fault),
                    })
                    .await;
            }
        });
    }

    async fn broadcast_deposit_with_retry(
        &self,
        signed_tx: SignedDepositTx,
    ) -> Result<TxIdString, SwapError> {
        let max_attempts = self.context.config.max_broadcast_attempts;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.context.wallet.broadcast_deposit(signed_tx.clone()).await {
                Ok(tx_id) => return Ok(tx_id),
                Err(fault) => {
                    warn!(
                        "Trade w/ TradeUUID {} deposit broadcast attempt {} failed - {}",
                        self.data.trade_uuid, attempts, fault
                    );
                    if attempts >= max_attempts {
                        return Err(SwapError::BroadcastExhausted(format!(
                            "Deposit tx broadcast failed after {} attempts - {}",
                            attempts, fault
                        )));
                    }
                    sleep(self.context.config.fee_poll_interval).await;
                }
            }
        }
    }

    async fn broadcast_payout_with_retry(
        &self,
        signed_tx: SignedPayoutTx,
    ) -> Result<TxIdString, SwapError> {
        let max_attempts = self.context.config.max_broadcast_attempts;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.context.wallet.broadcast_payout(signed_tx.clone()).await {
                Ok(tx_id) => return Ok(tx_id),
                Err(fault) => {
                    warn!(
                        "Trade w/ TradeUUID {} payout broadcast attempt {} failed - {}",
                        self.data.trade_uuid, attempts, fault
                    );
                    if attempts >= max_attempts {
                        return Err(SwapError::BroadcastExhausted(format!(
                            "Payout tx broadcast failed after {} attempts - {}",
                            attempts, fault
                        )));
                    }
                    sleep(self.context.config.fee_poll_interval).await;
                }
            }
        }
    }

    /// An armed peer deadline expired. Before any deposit material has been
    /// shared the trade can simply fail and release its inputs; once inputs
    /// and partial signatures have crossed the wire a silent peer goes to
    /// the arbitrator with funds still reserved.
    pub(super) async fn peer_timeout_expired(&mut self, waiting_for: String) {
        let reason = format!(
            "Timed out waiting for {} after {:?}",
            waiting_for, self.context.config.request_timeout
        );
        if self.data.state().deposit_handshake_started() {
            warn!(
                "Trade w/ TradeUUID {} peer went silent mid-handshake, escalating to arbitration - {}",
                self.data.trade_uuid, reason
            );
            self.escalate_to_arbitration(reason).await;
        } else {
            self.fail_trade(reason).await;
        }
    }

    /// Routes a stuck trade to the arbitrator. Unlike `fail_trade` the
    /// reserved inputs stay locked: a partial signature already shared means
    /// the peer may still publish the deposit, and releasing the UTXOs would
    /// invite a double spend. Contract, signatures and tx ids are retained
    /// as evidence.
    async fn escalate_to_arbitration(&mut self, reason: String) {
        self.disarm_timeout();
        self.fee_poll_nonce = None;
        self.send_to_peer(TradeMessage::Dispute {
            reason: reason.clone(),
        });
        self.data.set_fail_reason(reason.clone());
        self.transition(TradeState::Disputed).await;
        self.notify(TradeNotif::Disputed(reason)).await;
        self.retire_offer().await;
    }

    pub(super) async fn fail_trade(&mut self, reason: String) {
        if self.data.state().is_terminal() {
            return;
        }
        warn!(
            "Trade w/ TradeUUID {} failing - {}",
            self.data.trade_uuid, reason
        );
        self.disarm_timeout();
        self.fee_poll_nonce = None;
        self.data.set_fail_reason(reason.clone());
        self.context.wallet.release_inputs(self.data.trade_uuid).await;
        self.transition(TradeState::Failed).await;
        self.notify(TradeNotif::Failed(reason)).await;
        self.retire_offer().await;
    }

    async fn complete_trade(&mut self) {
        self.disarm_timeout();
        if let Some(deposit_tx_id) = self.data.deposit_tx_id() {
            self.context.witness.unsubscribe_confidence(&deposit_tx_id);
        }
        self.transition(TradeState::Completed).await;
        self.retire_offer().await;
    }

    /// The offer uuid doubles as the trade uuid, so once a reservation has
    /// been consumed the offer cannot be re-advertised. Terminal trades close
    /// it; the Maker republishes under a fresh uuid if still interested.
    async fn retire_offer(&self) {
        if self.data.role() != TradeRole::Maker {
            return;
        }
        if let Some(error) = self
            .context
            .registry
            .close_offer(self.data.trade_uuid)
            .await
            .err()
        {
            warn!(
                "Trade w/ TradeUUID {} failed in closing its offer - {}",
                self.data.trade_uuid, error
            );
        }
    }

    // User requests

    pub(super) async fn confirm_fiat_sent(&mut self) -> Result<(), SwapError> {
        if !self.is_fiat_payer() {
            return Err(SwapError::Simple(
                "Only the fiat-paying side can confirm the transfer was sent".to_string(),
            ));
        }
        if self.data.state() != TradeState::DepositConfirmed {
            return Err(SwapError::Simple(format!(
                "Cannot confirm fiat sent in state {}",
                self.data.state()
            )));
        }
        self.send_to_peer(TradeMessage::BankTransferInited {});
        self.transition(TradeState::FiatSent).await;
        Ok(())
    }

    pub(super) async fn confirm_fiat_received(&mut self) -> Result<(), SwapError> {
        if self.is_fiat_payer() {
            return Err(SwapError::Simple(
                "Only the fiat-receiving side can confirm the transfer arrived".to_string(),
            ));
        }
        if self.data.state() != TradeState::FiatSent {
            return Err(SwapError::Simple(format!(
                "Cannot confirm fiat received in state {}",
                self.data.state()
            )));
        }
        self.send_to_peer(TradeMessage::PaymentReceived {});
        self.transition(TradeState::FiatReceivedConfirmed).await;
        self.after_fiat_settled().await;
        Ok(())
    }

    pub(super) async fn open_dispute(&mut self, reason: String) -> Result<(), SwapError> {
        if self.data.state().is_terminal() {
            return Err(SwapError::Simple(format!(
                "Cannot open dispute in terminal state {}",
                self.data.state()
            )));
        }
        info!(
            "Trade w/ TradeUUID {} opening dispute - {}",
            self.data.trade_uuid, reason
        );
        self.escalate_to_arbitration(reason).await;
        Ok(())
    }

    // Taker kickoff

    async fn taker_kickoff(&mut self) -> Result<(), SwapError> {
        let trade_uuid = self.data.trade_uuid;
        let fee_sat = self.context.config.take_offer_fee_sat;

        let fee_tx_id = self.context.wallet.pay_fee(trade_uuid, fee_sat).await?;
        self.data.set_fee_tx_id(fee_tx_id.clone());

        let entry = self
            .context
            .wallet
            .get_or_create_address_entry(trade_uuid)
            .await?;
        self.data
            .set_my_address_entry(entry.payout_address, entry.multisig_pubkey);

        self.send_to_peer(TradeMessage::TakeOfferFeePayed {
            fee_tx_id,
            trade_amount_sat: self.data.trade_amount_sat(),
            trade_price: self.data.trade_price(),
            taker_pubkey: self.my_msg_pubkey(),
            taker_multisig_pubkey: entry.multisig_pubkey,
        });
        self.transition(TradeState::TakeOfferFeeValidated).await;
        self.arm_timeout("RequestDepositPayment");
        Ok(())
    }

    // Peer message dispatch

    pub(super) async fn handle_peer_message(&mut self, envelope: MessageEnvelope) {
        let msg_type: &'static str = (&envelope.message).into();
        debug!(
            "Trade w/ TradeUUID {} handle_peer_message() of type {}",
            self.data.trade_uuid, msg_type
        );

        if envelope.trade_uuid != self.data.trade_uuid {
            warn!(
                "Trade w/ TradeUUID {} received message for Trade {} - dropped",
                self.data.trade_uuid, envelope.trade_uuid
            );
            return;
        }
        if self.data.state().is_terminal() {
            warn!(
                "Trade w/ TradeUUID {} in terminal state {} received {} - dropped",
                self.data.trade_uuid,
                self.data.state(),
                msg_type
            );
            return;
        }

        let role = self.data.role();
        match (role, envelope.message) {
            (
                TradeRole::Maker,
                TradeMessage::TakeOfferFeePayed {
                    fee_tx_id,
                    trade_amount_sat,
                    trade_price,
                    taker_pubkey,
                    taker_multisig_pubkey,
                },
            ) => {
                self.handle_take_offer_fee_payed(
                    fee_tx_id,
                    trade_amount_sat,
                    trade_price,
                    taker_pubkey,
                    taker_multisig_pubkey,
                )
                .await;
            }
            (
                TradeRole::Taker,
                TradeMessage::RequestDepositPayment {
                    account_id,
                    payment_details,
                    msg_pubkey,
                    multisig_pubkey,
                    payout_address,
                    fee_per_vbyte,
                    my_inputs,
                },
            ) => {
                let maker_party = ContractParty {
                    account_id,
                    payment_details,
                    msg_pubkey,
                };
                if let Some(error) = self
                    .handle_request_deposit_payment(
                        maker_party,
                        multisig_pubkey,
                        payout_address,
                        fee_per_vbyte,
                        my_inputs,
                    )
                    .await
                    .err()
                {
                    self.fail_trade(error.to_string()).await;
                }
            }
            (
                TradeRole::Maker,
                TradeMessage::DepositPayment {
                    account_id,
                    payment_details,
                    msg_pubkey,
                    multisig_pubkey,
                    payout_address,
                    contract_json,
                    contract_sig,
                    my_inputs,
                    my_partial_sig,
                },
            ) => {
                let taker_party = ContractParty {
                    account_id,
                    payment_details,
                    msg_pubkey,
                };
                if let Some(error) = self
                    .handle_deposit_payment(
                        taker_party,
                        multisig_pubkey,
                        payout_address,
                        contract_json,
                        contract_sig,
                        my_inputs,
                        my_partial_sig,
                    )
                    .await
                    .err()
                {
                    self.fail_trade(error.to_string()).await;
                }
            }
            (TradeRole::Taker, TradeMessage::DepositTxPublished { deposit_tx_id }) => {
                if let Some(error) = self
                    .handle_deposit_tx_published(deposit_tx_id)
                    .await
                    .err()
                {
                    self.fail_trade(error.to_string()).await;
                }
            }
            (_, TradeMessage::BankTransferInited {}) => {
                self.handle_bank_transfer_inited().await;
            }
            (_, TradeMessage::PaymentReceived {}) => {
                self.handle_payment_received().await;
            }
            (
                TradeRole::Taker,
                TradeMessage::SignedPayoutTx {
                    payout_tx,
                    maker_sig,
                },
            ) => {
                if let Some(error) = self
                    .handle_signed_payout_tx(payout_tx, maker_sig)
                    .await
                    .err()
                {
                    self.fail_trade(error.to_string()).await;
                }
            }
            (TradeRole::Maker, TradeMessage::PayoutTxPublished { payout_tx_id }) => {
                if let Some(error) = self.handle_payout_tx_published(payout_tx_id).await.err() {
                    self.fail_trade(error.to_string()).await;
                }
            }
            (_, TradeMessage::Dispute { reason }) => {
                self.handle_peer_dispute(reason).await;
            }
            (role, message) => {
                let msg_type: &'static str = (&message).into();
                warn!(
                    "Trade w/ TradeUUID {} as {} received unexpected {} - dropped",
                    self.data.trade_uuid, role, msg_type
                );
            }
        }
    }

    // Maker: fee validation

    async fn handle_take_offer_fee_payed(
        &mut self,
        fee_tx_id: TxIdString,
        trade_amount_sat: u64,
        trade_price: u64,
        _taker_pubkey: XOnlyPublicKey,
        taker_multisig_pubkey: XOnlyPublicKey,
    ) {
        if self.data.state() != TradeState::Init {
            warn!(
                "Trade w/ TradeUUID {} received duplicate TakeOfferFeePayed in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return;
        }

        let offer = self.data.offer();
        if let Some(reason) = offer.validate_take(trade_amount_sat).err() {
            self.fail_trade(format!("Take rejected - {}", reason)).await;
            return;
        }
        if let PriceSpec::Fixed { price } = offer.price {
            if trade_price != price {
                self.fail_trade(format!(
                    "Taker proposed price {} against fixed offer price {}",
                    trade_price, price
                ))
                .await;
                return;
            }
        }

        self.data.set_trade_terms(trade_amount_sat, trade_price);
        self.data.set_fee_tx_id(fee_tx_id);
        self.data.set_peer_multisig_pubkey(taker_multisig_pubkey);

        // Overall deadline on fee propagation; individual polls below
        self.arm_timeout("take-offer fee network propagation");
        self.start_fee_polling().await;
    }

    async fn start_fee_polling(&mut self) {
        let nonce = Uuid::new_v4();
        self.fee_poll_nonce = Some(nonce);
        self.fee_check_tick(nonce).await;
    }

    /// The take-offer fee is accepted once enough network peers have been
    /// seen relaying the tx. A probabilistic double-spend check; waiting for
    /// a full confirmation here would stall every trade by a block interval.
    pub(super) async fn fee_check_tick(&mut self, nonce: Uuid) {
        if self.fee_poll_nonce != Some(nonce) {
            debug!(
                "Trade w/ TradeUUID {} stale fee check tick - no-op",
                self.data.trade_uuid
            );
            return;
        }
        if self.data.state() != TradeState::Init {
            self.fee_poll_nonce = None;
            return;
        }
        let Some(fee_tx_id) = self.data.fee_tx_id() else {
            self.fee_poll_nonce = None;
            return;
        };

        let seen_by = self.context.witness.broadcast_peer_count(&fee_tx_id);
        let min_peers = self.context.config.min_fee_broadcast_peers;
        if seen_by > min_peers {
            info!(
                "Trade w/ TradeUUID {} take-offer fee tx seen by {} peers - validated",
                self.data.trade_uuid, seen_by
            );
            self.fee_poll_nonce = None;
            self.disarm_timeout();
            self.transition(TradeState::TakeOfferFeeValidated).await;
            if let Some(error) = self.maker_request_deposit().await.err() {
                self.fail_trade(error.to_string()).await;
            }
            return;
        }

        debug!(
            "Trade w/ TradeUUID {} take-offer fee tx seen by {} peers, need more than {}",
            self.data.trade_uuid, seen_by, min_peers
        );
        let tx = self.self_tx.clone();
        let interval = self.context.config.fee_poll_interval;
        tokio::spawn(async move {
            sleep(interval).await;
            let _ = tx.send(TradeRequest::FeeCheckTick { nonce }).await;
        });
    }

    // Maker: deposit side

    async fn maker_request_deposit(&mut self) -> Result<(), SwapError> {
        let trade_uuid = self.data.trade_uuid;

        let entry = self
            .context
            .wallet
            .get_or_create_address_entry(trade_uuid)
            .await?;
        self.data
            .set_my_address_entry(entry.payout_address.clone(), entry.multisig_pubkey);

        let fee_per_vbyte = self.context.wallet.fee_per_vbyte().await;
        self.data.set_fee_per_vbyte(fee_per_vbyte);

        let coordinator = self.coordinator()?;
        let my_inputs = self
            .context
            .wallet
            .build_inputs_for_amount(trade_uuid, coordinator.input_target_sat())
            .await?;
        self.data.set_my_inputs(my_inputs.clone());
        self.transition(TradeState::DepositTxBuilt).await;

        self.send_to_peer(TradeMessage::RequestDepositPayment {
            account_id: self.context.account_id.clone(),
            payment_details: self.context.payment_details.clone(),
            msg_pubkey: self.my_msg_pubkey(),
            multisig_pubkey: entry.multisig_pubkey,
            payout_address: entry.payout_address,
            fee_per_vbyte,
            my_inputs,
        });
        self.arm_timeout("DepositPayment");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_deposit_payment(
        &mut self,
        taker_party: ContractParty,
        taker_multisig_pubkey: XOnlyPublicKey,
        taker_payout_address: String,
        contract_json: String,
        contract_sig: Signature,
        taker_inputs: RawInputs,
        taker_partial_sig: PartialSignature,
    ) -> Result<(), SwapError> {
        if self.data.state() != TradeState::DepositTxBuilt {
            warn!(
                "Trade w/ TradeUUID {} received duplicate DepositPayment in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return Ok(());
        }
        self.disarm_timeout();

        let taker_msg_pubkey = taker_party.msg_pubkey;
        self.data.set_peer_party(taker_party);
        self.data.set_peer_multisig_pubkey(taker_multisig_pubkey);
        self.data.set_peer_payout_address(taker_payout_address);

        // Contract bytes must match before any signature is made or checked
        let contract = self.local_contract()?;
        if !contract.verify_peer_contract(&contract_json)? {
            return Err(SwapError::ContractMismatch);
        }
        contract.verify_signature(&contract_sig, &taker_msg_pubkey)?;

        let my_sig = contract.sign(&self.context.keypair)?;
        self.data.set_contract(contract);
        self.data.set_peer_contract_sig(contract_sig);
        self.data.set_my_contract_sig(my_sig);
        self.transition(TradeState::ContractExchanged).await;

        let coordinator = self.coordinator()?;
        let my_inputs = self
            .data
            .my_inputs()
            .ok_or_else(|| SwapError::Simple("Own deposit inputs missing".to_string()))?;
        let unsigned_tx = coordinator.assemble_deposit(&my_inputs, &taker_inputs)?;
        coordinator.verify_partial_sig(&taker_partial_sig, &taker_inputs, &taker_multisig_pubkey)?;
        self.data.set_peer_inputs(taker_inputs);
        self.data.set_peer_partial_sig(taker_partial_sig);
        self.data.set_unsigned_deposit_tx(unsigned_tx.clone());

        let my_partial_sig = self
            .context
            .wallet
            .sign_deposit_inputs(self.data.trade_uuid, unsigned_tx)
            .await?;
        self.data.set_my_partial_sig(my_partial_sig);
        self.transition(TradeState::DepositTxSigned).await;

        self.maker_publish_deposit().await
    }

    /// Finalizes and broadcasts the fully signed deposit tx. Also the resume
    /// entry point for a Maker that crashed between signing and publishing.
    pub(super) async fn maker_publish_deposit(&mut self) -> Result<(), SwapError> {
        let unsigned_tx = self
            .data
            .unsigned_deposit_tx()
            .ok_or_else(|| SwapError::Simple("Unsigned deposit tx missing".to_string()))?;
        let my_partial_sig = self
            .data
            .my_partial_sig()
            .ok_or_else(|| SwapError::Simple("Own deposit signature missing".to_string()))?;
        let taker_partial_sig = self
            .data
            .peer_partial_sig()
            .ok_or_else(|| SwapError::Simple("Taker deposit signature missing".to_string()))?;

        let coordinator = self.coordinator()?;
        let signed_tx =
            coordinator.finalize_deposit(unsigned_tx, my_partial_sig, taker_partial_sig)?;
        let deposit_tx_id = self.broadcast_deposit_with_retry(signed_tx).await?;
        self.data.set_deposit_tx_id(deposit_tx_id.clone());
        self.context
            .witness
            .subscribe_confidence(&deposit_tx_id, self.confidence_tx.clone());

        self.send_to_peer(TradeMessage::DepositTxPublished { deposit_tx_id });
        self.transition(TradeState::DepositTxPublished).await;
        Ok(())
    }

    // Taker: deposit side

    async fn handle_request_deposit_payment(
        &mut self,
        maker_party: ContractParty,
        maker_multisig_pubkey: XOnlyPublicKey,
        maker_payout_address: String,
        fee_per_vbyte: u64,
        maker_inputs: RawInputs,
    ) -> Result<(), SwapError> {
        if self.data.state() != TradeState::TakeOfferFeeValidated {
            warn!(
                "Trade w/ TradeUUID {} received duplicate RequestDepositPayment in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return Ok(());
        }
        self.disarm_timeout();

        self.data.set_peer_party(maker_party);
        self.data.set_peer_multisig_pubkey(maker_multisig_pubkey);
        self.data.set_peer_payout_address(maker_payout_address);
        self.data.set_fee_per_vbyte(fee_per_vbyte);

        let coordinator = self.coordinator()?;
        coordinator.verify_side_inputs(&maker_inputs, "Maker")?;
        self.data.set_peer_inputs(maker_inputs.clone());

        let my_inputs = self
            .context
            .wallet
            .build_inputs_for_amount(self.data.trade_uuid, coordinator.input_target_sat())
            .await?;
        self.data.set_my_inputs(my_inputs.clone());
        self.transition(TradeState::DepositTxBuilt).await;

        let contract = self.local_contract()?;
        let contract_json = contract.canonical_json()?;
        let contract_sig = contract.sign(&self.context.keypair)?;
        self.data.set_contract(contract);
        self.data.set_my_contract_sig(contract_sig);
        self.transition(TradeState::ContractExchanged).await;

        let unsigned_tx = coordinator.assemble_deposit(&maker_inputs, &my_inputs)?;
        self.data.set_unsigned_deposit_tx(unsigned_tx.clone());
        let my_partial_sig = self
            .context
            .wallet
            .sign_deposit_inputs(self.data.trade_uuid, unsigned_tx)
            .await?;
        self.data.set_my_partial_sig(my_partial_sig.clone());
        self.transition(TradeState::DepositTxSigned).await;

        let my_multisig_pubkey = self
            .data
            .my_multisig_pubkey()
            .ok_or_else(|| SwapError::Simple("Own multisig pubkey missing".to_string()))?;
        let my_payout_address = self
            .data
            .my_payout_address()
            .ok_or_else(|| SwapError::Simple("Own payout address missing".to_string()))?;

        self.send_to_peer(TradeMessage::DepositPayment {
            account_id: self.context.account_id.clone(),
            payment_details: self.context.payment_details.clone(),
            msg_pubkey: self.my_msg_pubkey(),
            multisig_pubkey: my_multisig_pubkey,
            payout_address: my_payout_address,
            contract_json,
            contract_sig,
            my_inputs,
            my_partial_sig,
        });
        self.arm_timeout("DepositTxPublished");
        Ok(())
    }

    async fn handle_deposit_tx_published(
        &mut self,
        deposit_tx_id: TxIdString,
    ) -> Result<(), SwapError> {
        if self.data.state() != TradeState::DepositTxSigned {
            warn!(
                "Trade w/ TradeUUID {} received duplicate DepositTxPublished in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return Ok(());
        }
        self.disarm_timeout();

        let unsigned_tx = self
            .data
            .unsigned_deposit_tx()
            .ok_or_else(|| SwapError::Simple("Unsigned deposit tx missing".to_string()))?;
        let expected_tx_id = unsigned_tx.tx_id()?;
        if deposit_tx_id != expected_tx_id {
            return Err(SwapError::DepositMismatch(format!(
                "Maker published deposit tx {}, locally derived {}",
                deposit_tx_id, expected_tx_id
            )));
        }

        self.data.set_deposit_tx_id(deposit_tx_id.clone());
        self.context
            .witness
            .subscribe_confidence(&deposit_tx_id, self.confidence_tx.clone());
        self.transition(TradeState::DepositTxPublished).await;
        Ok(())
    }

    // Both roles: chain confidence

    pub(super) async fn handle_confidence_event(&mut self, event: ConfidenceEvent) {
        let Some(deposit_tx_id) = self.data.deposit_tx_id() else {
            return;
        };
        if event.tx_id != deposit_tx_id {
            return;
        }

        self.data.set_deposit_depth(event.depth);
        self.notify(TradeNotif::DepositDepthChanged(event.depth)).await;

        if self.data.state() == TradeState::DepositTxPublished && event.depth >= 1 {
            self.transition(TradeState::DepositConfirmed).await;
        }
    }

    // Both roles: fiat leg

    async fn handle_bank_transfer_inited(&mut self) {
        if self.is_fiat_payer() {
            warn!(
                "Trade w/ TradeUUID {} fiat payer received BankTransferInited - dropped",
                self.data.trade_uuid
            );
            return;
        }
        if self.data.state() != TradeState::DepositConfirmed {
            warn!(
                "Trade w/ TradeUUID {} received duplicate BankTransferInited in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return;
        }
        self.transition(TradeState::FiatSent).await;
    }

    async fn handle_payment_received(&mut self) {
        if !self.is_fiat_payer() {
            warn!(
                "Trade w/ TradeUUID {} fiat receiver received PaymentReceived - dropped",
                self.data.trade_uuid
            );
            return;
        }
        if self.data.state() != TradeState::FiatSent {
            warn!(
                "Trade w/ TradeUUID {} received duplicate PaymentReceived in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return;
        }
        self.transition(TradeState::FiatReceivedConfirmed).await;
        self.after_fiat_settled().await;
    }

    /// Once both sides regard the fiat leg settled, the Maker proposes the
    /// payout and the Taker waits to co-sign it.
    async fn after_fiat_settled(&mut self) {
        match self.data.role() {
            TradeRole::Maker => {
                if let Some(error) = self.maker_send_payout().await.err() {
                    self.fail_trade(error.to_string()).await;
                }
            }
            TradeRole::Taker => {
                self.arm_timeout("SignedPayoutTx");
            }
        }
    }

    // Payout

    fn payout_addresses(&self) -> Result<(String, String), SwapError> {
        let my_address = self
            .data
            .my_payout_address()
            .ok_or_else(|| SwapError::Simple("Own payout address missing".to_string()))?;
        let peer_address = self
            .data
            .peer_payout_address()
            .ok_or_else(|| SwapError::Simple("Peer payout address missing".to_string()))?;
        // Buyer first: the fiat payer is the Bitcoin buyer
        if self.is_fiat_payer() {
            Ok((my_address, peer_address))
        } else {
            Ok((peer_address, my_address))
        }
    }

    async fn maker_send_payout(&mut self) -> Result<(), SwapError> {
        let deposit_tx_id = self
            .data
            .deposit_tx_id()
            .ok_or_else(|| SwapError::Simple("Deposit tx id missing".to_string()))?;
        let (buyer_address, seller_address) = self.payout_addresses()?;

        let coordinator = self.coordinator()?;
        let payout_tx = coordinator.payout_tx(deposit_tx_id, buyer_address, seller_address);
        self.data.set_payout_tx(payout_tx.clone());

        let maker_sig = self
            .context
            .wallet
            .sign_payout(self.data.trade_uuid, payout_tx.clone())
            .await?;
        self.send_to_peer(TradeMessage::SignedPayoutTx {
            payout_tx,
            maker_sig,
        });
        self.arm_timeout("PayoutTxPublished");
        Ok(())
    }

    async fn handle_signed_payout_tx(
        &mut self,
        payout_tx: PayoutTx,
        maker_sig: PartialSignature,
    ) -> Result<(), SwapError> {
        if self.data.state() != TradeState::FiatReceivedConfirmed {
            warn!(
                "Trade w/ TradeUUID {} received duplicate SignedPayoutTx in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return Ok(());
        }
        self.disarm_timeout();

        let deposit_tx_id = self
            .data
            .deposit_tx_id()
            .ok_or_else(|| SwapError::Simple("Deposit tx id missing".to_string()))?;
        let (buyer_address, seller_address) = self.payout_addresses()?;
        let coordinator = self.coordinator()?;
        coordinator.verify_payout_tx(&payout_tx, &deposit_tx_id, &buyer_address, &seller_address)?;

        self.data.set_payout_tx(payout_tx.clone());
        let my_sig = self
            .context
            .wallet
            .sign_payout(self.data.trade_uuid, payout_tx.clone())
            .await?;
        let signed_tx = coordinator.finalize_payout(payout_tx, maker_sig, my_sig)?;
        let payout_tx_id = self.broadcast_payout_with_retry(signed_tx).await?;
        self.data.set_payout_tx_id(payout_tx_id.clone());

        self.send_to_peer(TradeMessage::PayoutTxPublished { payout_tx_id });
        self.transition(TradeState::PayoutPublished).await;
        self.complete_trade().await;
        Ok(())
    }

    async fn handle_payout_tx_published(
        &mut self,
        payout_tx_id: TxIdString,
    ) -> Result<(), SwapError> {
        if self.data.state() != TradeState::FiatReceivedConfirmed {
            warn!(
                "Trade w/ TradeUUID {} received duplicate PayoutTxPublished in state {} - ignored",
                self.data.trade_uuid,
                self.data.state()
            );
            return Ok(());
        }
        self.disarm_timeout();

        let payout_tx = self
            .data
            .payout_tx()
            .ok_or_else(|| SwapError::Simple("Payout tx missing".to_string()))?;
        let expected_tx_id = payout_tx.tx_id()?;
        if payout_tx_id != expected_tx_id {
            return Err(SwapError::DepositMismatch(format!(
                "Taker published payout tx {}, locally derived {}",
                payout_tx_id, expected_tx_id
            )));
        }

        self.data.set_payout_tx_id(payout_tx_id);
        self.transition(TradeState::PayoutPublished).await;
        self.complete_trade().await;
        Ok(())
    }

    // Dispute

    async fn handle_peer_dispute(&mut self, reason: String) {
        warn!(
            "Trade w/ TradeUUID {} peer opened dispute - {}",
            self.data.trade_uuid, reason
        );
        self.disarm_timeout();
        self.fee_poll_nonce = None;
        self.data.set_fail_reason(reason.clone());
        self.transition(TradeState::Disputed).await;
        self.notify(TradeNotif::Disputed(reason)).await;
        self.retire_offer().await;
    }
}
