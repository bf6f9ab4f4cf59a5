use std::{error::Error, fmt};

use secp256k1::XOnlyPublicKey;
use strum_macros::{Display, IntoStaticStr};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::{error::SwapError, types::TxIdString};
use crate::deposit::{
    PartialSignature, PayoutTx, RawInputs, SignedDepositTx, SignedPayoutTx, UnsignedDepositTx,
};

#[derive(Clone, Debug)]
pub enum WalletFault {
    InsufficientFunds { needed_sat: u64, available_sat: u64 },
    SigningFailure(String),
    BroadcastFailure(String),
}

impl Error for WalletFault {}

impl fmt::Display for WalletFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletFault::InsufficientFunds {
                needed_sat,
                available_sat,
            } => write!(
                f,
                "Insufficient funds - needed {} sat, available {} sat",
                needed_sat, available_sat
            ),
            WalletFault::SigningFailure(msg) => write!(f, "Signing failure - {}", msg),
            WalletFault::BroadcastFailure(msg) => write!(f, "Broadcast failure - {}", msg),
        }
    }
}

impl From<WalletFault> for SwapError {
    fn from(fault: WalletFault) -> SwapError {
        SwapError::Wallet(fault.to_string())
    }
}

/// Per-trade address material handed out by the wallet.
#[derive(Clone, Debug)]
pub struct AddressEntry {
    pub payout_address: String,
    pub multisig_pubkey: XOnlyPublicKey,
}

/// Wallet & fee oracle consumed by the engine. Key management, coin
/// selection policy and script construction are the implementation's
/// business; the engine only requires that UTXOs handed out for one trade
/// uuid are not handed out again for another until released.
///
/// Methods take `&mut self` on purpose: all access goes through the
/// `WalletGate` actor below, which is the single serializing gate for shared
/// wallet state across concurrently running trades.
pub trait WalletOracle: Send + 'static {
    fn fee_per_vbyte(&self) -> u64;

    fn get_or_create_address_entry(&mut self, trade_uuid: Uuid)
        -> Result<AddressEntry, WalletFault>;

    /// Selects UTXOs totalling at least `target_sat` plus a change output
    /// for the excess, reserving them against `trade_uuid`.
    fn build_inputs_for_amount(
        &mut self,
        trade_uuid: Uuid,
        target_sat: u64,
    ) -> Result<RawInputs, WalletFault>;

    /// Returns UTXOs reserved for a trade to the spendable pool. Idempotent.
    fn release_inputs(&mut self, trade_uuid: Uuid);

    /// Builds, signs and broadcasts the take-offer fee transaction.
    fn pay_fee(&mut self, trade_uuid: Uuid, fee_sat: u64) -> Result<TxIdString, WalletFault>;

    fn sign_deposit_inputs(
        &mut self,
        trade_uuid: Uuid,
        unsigned_tx: &UnsignedDepositTx,
    ) -> Result<PartialSignature, WalletFault>;

    fn broadcast_deposit(&mut self, signed_tx: &SignedDepositTx) -> Result<TxIdString, WalletFault>;

    fn sign_payout(
        &mut self,
        trade_uuid: Uuid,
        payout_tx: &PayoutTx,
    ) -> Result<PartialSignature, WalletFault>;

    fn broadcast_payout(&mut self, signed_tx: &SignedPayoutTx) -> Result<TxIdString, WalletFault>;
}

#[derive(Clone)]
pub struct WalletAccess {
    tx: mpsc::Sender<WalletRequest>,
}

impl WalletAccess {
    pub(crate) fn new(tx: mpsc::Sender<WalletRequest>) -> Self {
        Self { tx }
    }

    pub async fn fee_per_vbyte(&self) -> u64 {
        let (rsp_tx, rsp_rx) = oneshot::channel::<u64>();
        let request = WalletRequest::FeePerVbyte { rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn get_or_create_address_entry(
        &self,
        trade_uuid: Uuid,
    ) -> Result<AddressEntry, WalletFault> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<AddressEntry, WalletFault>>();
        let request = WalletRequest::AddressEntry { trade_uuid, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn build_inputs_for_amount(
        &self,
        trade_uuid: Uuid,
        target_sat: u64,
    ) -> Result<RawInputs, WalletFault> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<RawInputs, WalletFault>>();
        let request = WalletRequest::BuildInputs {
            trade_uuid,
            target_sat,
            rsp_tx,
        };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn release_inputs(&self, trade_uuid: Uuid) {
        let (rsp_tx, rsp_rx) = oneshot::channel::<()>();
        let request = WalletRequest::ReleaseInputs { trade_uuid, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn pay_fee(&self, trade_uuid: Uuid, fee_sat: u64) -> Result<TxIdString, WalletFault> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<TxIdString, WalletFault>>();
        let request = WalletRequest::PayFee {
            trade_uuid,
            fee_sat,
            rsp_tx,
        };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn sign_deposit_inputs(
        &self,
        trade_uuid: Uuid,
        unsigned_tx: UnsignedDepositTx,
    ) -> Result<PartialSignature, WalletFault> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<PartialSignature, WalletFault>>();
        let request = WalletRequest::SignDepositInputs {
            trade_uuid,
            unsigned_tx,
            rsp_tx,
        };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn broadcast_deposit(
        &self,
        signed_tx: SignedDepositTx,
    ) -> Result<TxIdString, WalletFault> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<TxIdString, WalletFault>>();
        let request = WalletRequest::BroadcastDeposit { signed_tx, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn sign_payout(
        &self,
        trade_uuid: Uuid,
        payout_tx: PayoutTx,
    ) -> Result<PartialSignature, WalletFault> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<PartialSignature, WalletFault>>();
        let request = WalletRequest::SignPayout {
            trade_uuid,
            payout_tx,
            rsp_tx,
        };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn broadcast_payout(
        &self,
        signed_tx: SignedPayoutTx,
    ) -> Result<TxIdString, WalletFault> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<TxIdString, WalletFault>>();
        let request = WalletRequest::BroadcastPayout { signed_tx, rsp_tx };
        self.tx.send(request).await.unwrap();
        rsp_rx.await.unwrap()
    }

    pub async fn shutdown(&self) -> Result<(), SwapError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<()>();
        let request = WalletRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        rsp_rx.await?;
        Ok(())
    }
}

#[derive(Display, IntoStaticStr)]
pub(crate) enum WalletRequest {
    FeePerVbyte {
        rsp_tx: oneshot::Sender<u64>,
    },
    AddressEntry {
        trade_uuid: Uuid,
        rsp_tx: oneshot::Sender<Result<AddressEntry, WalletFault>>,
    },
    BuildInputs {
        trade_uuid: Uuid,
        target_sat: u64,
        rsp_tx: oneshot::Sender<Result<RawInputs, WalletFault>>,
    },
    ReleaseInputs {
        trade_uuid: Uuid,
        rsp_tx: oneshot::Sender<()>,
    },
    PayFee {
        trade_uuid: Uuid,
        fee_sat: u64,
        rsp_tx: oneshot::Sender<Result<TxIdString, WalletFault>>,
    },
    SignDepositInputs {
        trade_uuid: Uuid,
        unsigned_tx: UnsignedDepositTx,
        rsp_tx: oneshot::Sender<Result<PartialSignature, WalletFault>>,
    },
    BroadcastDeposit {
        signed_tx: SignedDepositTx,
        rsp_tx: oneshot::Sender<Result<TxIdString, WalletFault>>,
    },
    SignPayout {
        trade_uuid: Uuid,
        payout_tx: PayoutTx,
        rsp_tx: oneshot::Sender<Result<PartialSignature, WalletFault>>,
    },
    BroadcastPayout {
        signed_tx: SignedPayoutTx,
        rsp_tx: oneshot::Sender<Result<TxIdString, WalletFault>>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<()>,
    },
}

/// The single serializing gate in front of the wallet oracle. Every trade
/// actor talks to the wallet through a `WalletAccess` handle; requests are
/// processed one at a time off this actor's mailbox, so UTXO selection for
/// one trade can never interleave with selection for another.
pub struct WalletGate {
    tx: mpsc::Sender<WalletRequest>,
    pub(crate) task_handle: tokio::task::JoinHandle<()>,
}

impl WalletGate {
    const WALLET_REQUEST_CHANNEL_SIZE: usize = 20;

    pub fn new(oracle: Box<dyn WalletOracle>) -> Self {
        let (tx, rx) = mpsc::channel::<WalletRequest>(Self::WALLET_REQUEST_CHANNEL_SIZE);
        let actor = WalletGateActor { rx, oracle };
        let task_handle = tokio::spawn(async move { actor.run().await });
        Self { tx, task_handle }
    }

    pub fn new_accessor(&self) -> WalletAccess {
        WalletAccess::new(self.tx.clone())
    }
}

struct WalletGateActor {
    rx: mpsc::Receiver<WalletRequest>,
    oracle: Box<dyn WalletOracle>,
}

impl WalletGateActor {
    async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            if self.handle_request(request) {
                break;
            }
        }
        info!("WalletGate terminating");
    }

    fn handle_request(&mut self, request: WalletRequest) -> bool {
        debug!("WalletGate handle_request() of type {}", request);

        match request {
            WalletRequest::FeePerVbyte { rsp_tx } => {
                rsp_tx.send(self.oracle.fee_per_vbyte()).unwrap(); // oneshot should not fail
            }
            WalletRequest::AddressEntry { trade_uuid, rsp_tx } => {
                rsp_tx
                    .send(self.oracle.get_or_create_address_entry(trade_uuid))
                    .unwrap(); // oneshot should not fail
            }
            WalletRequest::BuildInputs {
                trade_uuid,
                target_sat,
                rsp_tx,
            } => {
                rsp_tx
                    .send(self.oracle.build_inputs_for_amount(trade_uuid, target_sat))
                    .unwrap(); // oneshot should not fail
            }
            WalletRequest::ReleaseInputs { trade_uuid, rsp_tx } => {
                self.oracle.release_inputs(trade_uuid);
                rsp_tx.send(()).unwrap(); // oneshot should not fail
            }
            WalletRequest::PayFee {
                trade_uuid,
                fee_sat,
                rsp_tx,
            } => {
                rsp_tx
                    .send(self.oracle.pay_fee(trade_uuid, fee_sat))
                    .unwrap(); // oneshot should not fail
            }
            WalletRequest::SignDepositInputs {
                trade_uuid,
                unsigned_tx,
                rsp_tx,
            } => {
                rsp_tx
                    .send(self.oracle.sign_deposit_inputs(trade_uuid, &unsigned_tx))
                    .unwrap(); // oneshot should not fail
            }
            WalletRequest::BroadcastDeposit { signed_tx, rsp_tx } => {
                rsp_tx
                    .send(self.oracle.broadcast_deposit(&signed_tx))
                    .unwrap(); // oneshot should not fail
            }
            WalletRequest::SignPayout {
                trade_uuid,
                payout_tx,
                rsp_tx,
            } => {
                rsp_tx
                    .send(self.oracle.sign_payout(trade_uuid, &payout_tx))
                    .unwrap(); // oneshot should not fail
            }
            WalletRequest::BroadcastPayout { signed_tx, rsp_tx } => {
                rsp_tx
                    .send(self.oracle.broadcast_payout(&signed_tx))
                    .unwrap(); // oneshot should not fail
            }
            WalletRequest::Shutdown { rsp_tx } => {
                rsp_tx.send(()).unwrap(); // oneshot should not fail
                return true;
            }
        }
        false
    }
}
