use std::{error::Error, fmt};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

/// Reasons a take-offer attempt is rejected before any network call is made.
/// These are checked synchronously by the Manager and never enter the trade
/// state machine.
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum TakeOfferRejectReason {
    NoPaymentAccount,
    BannedCurrency,
    BannedPaymentMethod,
    BannedNodeAddress,
    OfferAlreadyTaken,
    AmountOutOfRange,
    ProtocolVersionMismatch,
}

#[derive(Debug)]
pub enum SwapError {
    Simple(String),
    Rejected(TakeOfferRejectReason),
    OfferUnavailable(String),
    ContractMismatch,
    BadSignature(String),
    DepositMismatch(String),
    UnexpectedMessage(String),
    Timeout(String),
    Transport(String),
    Wallet(String),
    BroadcastExhausted(String),
    TradeDisputed(String),
    StrumParsing(strum::ParseError),
    CurrencyParsing(iso_currency::ParseCurrencyError),
    Secp(secp256k1::Error),
    SerdesJson(serde_json::Error),
    Io(std::io::Error),
    MpscSend(String),
    OneshotRecv(tokio::sync::oneshot::error::RecvError),
}

impl Error for SwapError {}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let error_string = match self {
            SwapError::Simple(msg) => format!("SatSwap-Error | Other - {}", msg),
            SwapError::Rejected(reason) => {
                format!("SatSwap-Error | TakeOfferRejected - {}", reason)
            }
            SwapError::OfferUnavailable(msg) => {
                format!("SatSwap-Error | OfferUnavailable - {}", msg)
            }
            SwapError::ContractMismatch => {
                "SatSwap-Error | ContractMismatch - peer contract serialization differs from local"
                    .to_string()
            }
            SwapError::BadSignature(msg) => {
                format!("SatSwap-Error | BadSignature - {}", msg)
            }
            SwapError::DepositMismatch(msg) => {
                format!("SatSwap-Error | DepositMismatch - {}", msg)
            }
            SwapError::UnexpectedMessage(msg) => {
                format!("SatSwap-Error | UnexpectedMessage - {}", msg)
            }
            SwapError::Timeout(msg) => format!("SatSwap-Error | Timeout - {}", msg),
            SwapError::Transport(msg) => format!("SatSwap-Error | Transport - {}", msg),
            SwapError::Wallet(msg) => format!("SatSwap-Error | Wallet - {}", msg),
            SwapError::BroadcastExhausted(msg) => {
                format!("SatSwap-Error | BroadcastExhausted - {}", msg)
            }
            SwapError::TradeDisputed(msg) => {
                format!("SatSwap-Error | TradeDisputed - {}", msg)
            }
            SwapError::StrumParsing(err) => {
                format!("SatSwap-Error | StrumParseError - {}", err)
            }
            SwapError::CurrencyParsing(err) => {
                format!("SatSwap-Error | ParseCurrencyError - {}", err)
            }
            SwapError::Secp(err) => format!("SatSwap-Error | SecpError - {}", err),
            SwapError::SerdesJson(err) => format!("SatSwap-Error | SerdesJsonError - {}", err),
            SwapError::Io(err) => format!("SatSwap-Error | IoError - {}", err),
            SwapError::MpscSend(msg) => format!("SatSwap-Error | MpscSendError - {}", msg),
            SwapError::OneshotRecv(err) => {
                format!("SatSwap-Error | OneshotRecvError - {}", err)
            }
        };
        write!(f, "{}", error_string)
    }
}

impl From<strum::ParseError> for SwapError {
    fn from(e: strum::ParseError) -> SwapError {
        SwapError::StrumParsing(e)
    }
}

impl From<iso_currency::ParseCurrencyError> for SwapError {
    fn from(e: iso_currency::ParseCurrencyError) -> SwapError {
        SwapError::CurrencyParsing(e)
    }
}

impl From<secp256k1::Error> for SwapError {
    fn from(e: secp256k1::Error) -> SwapError {
        SwapError::Secp(e)
    }
}

impl From<serde_json::Error> for SwapError {
    fn from(e: serde_json::Error) -> SwapError {
        SwapError::SerdesJson(e)
    }
}

impl From<std::io::Error> for SwapError {
    fn from(e: std::io::Error) -> SwapError {
        SwapError::Io(e)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SwapError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> SwapError {
        SwapError::MpscSend(e.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SwapError {
    fn from(e: tokio::sync::oneshot::error::RecvError) -> SwapError {
        SwapError::OneshotRecv(e)
    }
}
