use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

#[derive(
    PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum TradeRole {
    Maker,
    Taker,
}

/// Lifecycle of a single trade. Shared by both roles; each role traverses
/// the same sequence, differing only in which side drives each transition.
/// `Failed` and `Disputed` are reachable from any non-terminal state.
#[derive(
    PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum TradeState {
    Init,
    AvailabilityChecked,
    TakeOfferFeeValidated,
    DepositTxBuilt,
    ContractExchanged,
    DepositTxSigned,
    DepositTxPublished,
    DepositConfirmed,
    FiatSent,
    FiatReceivedConfirmed,
    PayoutPublished,
    Completed,
    Failed,
    Disputed,
}

impl TradeState {
    /// Terminal states accept no further protocol messages or user actions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeState::Completed | TradeState::Failed | TradeState::Disputed
        )
    }

    /// True from the moment deposit negotiation starts. Inputs and partial
    /// signatures cross the wire from `DepositTxBuilt` onward, so a peer
    /// going silent past this point is an arbitration case, not a local
    /// failure.
    pub fn deposit_handshake_started(&self) -> bool {
        matches!(
            self,
            TradeState::DepositTxBuilt
                | TradeState::ContractExchanged
                | TradeState::DepositTxSigned
                | TradeState::DepositTxPublished
                | TradeState::DepositConfirmed
                | TradeState::FiatSent
                | TradeState::FiatReceivedConfirmed
                | TradeState::PayoutPublished
        )
    }

    /// Coarse progress view for higher layers. Derived from state, never
    /// stored.
    pub fn progress_pct(&self) -> u8 {
        match self {
            TradeState::Init => 0,
            TradeState::AvailabilityChecked => 9,
            TradeState::TakeOfferFeeValidated => 18,
            TradeState::DepositTxBuilt => 27,
            TradeState::ContractExchanged => 36,
            TradeState::DepositTxSigned => 45,
            TradeState::DepositTxPublished => 55,
            TradeState::DepositConfirmed => 64,
            TradeState::FiatSent => 73,
            TradeState::FiatReceivedConfirmed => 82,
            TradeState::PayoutPublished => 91,
            TradeState::Completed | TradeState::Failed | TradeState::Disputed => 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TradeState::Completed.is_terminal());
        assert!(TradeState::Failed.is_terminal());
        assert!(TradeState::Disputed.is_terminal());
        assert!(!TradeState::FiatSent.is_terminal());
        assert!(!TradeState::Init.is_terminal());
    }

    #[test]
    fn deposit_handshake_boundary() {
        assert!(!TradeState::Init.deposit_handshake_started());
        assert!(!TradeState::AvailabilityChecked.deposit_handshake_started());
        assert!(!TradeState::TakeOfferFeeValidated.deposit_handshake_started());
        assert!(TradeState::DepositTxBuilt.deposit_handshake_started());
        assert!(TradeState::DepositTxSigned.deposit_handshake_started());
        assert!(TradeState::FiatReceivedConfirmed.deposit_handshake_started());
        assert!(!TradeState::Failed.deposit_handshake_started());
    }

    #[test]
    fn progress_is_monotonic_along_the_happy_path() {
        let states = [
            TradeState::Init,
            TradeState::AvailabilityChecked,
            TradeState::TakeOfferFeeValidated,
            TradeState::DepositTxBuilt,
            TradeState::ContractExchanged,
            TradeState::DepositTxSigned,
            TradeState::DepositTxPublished,
            TradeState::DepositConfirmed,
            TradeState::FiatSent,
            TradeState::FiatReceivedConfirmed,
            TradeState::PayoutPublished,
            TradeState::Completed,
        ];
        for pair in states.windows(2) {
            assert!(pair[0].progress_pct() < pair[1].progress_pct());
        }
        assert_eq!(TradeState::Completed.progress_pct(), 100);
    }
}
