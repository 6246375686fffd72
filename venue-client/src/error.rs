//! Venue error taxonomy
//!
//! Order-placement failures are partitioned into the kinds the engine
//! reacts to. Only a subset is terminal for a trade row; a status probe
//! failing with `PermissionDenied` must never overwrite a successful
//! placement, so the classification is exposed to callers rather than
//! collapsed into one opaque error string.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VenueError {
    #[error("margin insufficient: {msg}")]
    MarginInsufficient { code: i64, msg: String },
    #[error("quantity out of bounds: {msg}")]
    QtyOutOfBounds { code: i64, msg: String },
    #[error("notional too small: {msg}")]
    NotionalTooSmall { code: i64, msg: String },
    #[error("order would immediately trigger: {msg}")]
    WouldImmediatelyTrigger { code: i64, msg: String },
    #[error("symbol unsupported: {0}")]
    SymbolUnsupported(String),
    #[error("permission denied: {msg}")]
    PermissionDenied { code: i64, msg: String },
    #[error("rate limited: {code} - {msg}")]
    RateLimited { code: i64, msg: String },
    #[error("order not found: {msg}")]
    OrderNotFound { code: i64, msg: String },
    #[error("venue error: {code} - {msg}")]
    Venue { code: i64, msg: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed venue response: {0}")]
    Malformed(String),
    #[error("listen key expired")]
    ListenKeyExpired,
    #[error("connection interrupted")]
    ConnectionInterrupted,
}

/// Placement-failure labels persisted on trade rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MarginInsufficient,
    QtyOutOfBounds,
    NotionalTooSmall,
    WouldImmediatelyTrigger,
    SymbolUnsupported,
    PriceOutOfRange,
    PermissionDenied,
    Transient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MarginInsufficient => "MARGIN_INSUFFICIENT",
            FailureKind::QtyOutOfBounds => "QTY_OUT_OF_BOUNDS",
            FailureKind::NotionalTooSmall => "NOTIONAL_TOO_SMALL",
            FailureKind::WouldImmediatelyTrigger => "WOULD_IMMEDIATELY_TRIGGER",
            FailureKind::SymbolUnsupported => "SYMBOL_UNSUPPORTED",
            FailureKind::PriceOutOfRange => "PRICE_OUT_OF_RANGE",
            FailureKind::PermissionDenied => "PERMISSION_DENIED",
            FailureKind::Transient => "TRANSIENT",
        }
    }
}

impl VenueError {
    /// Classify a Binance USDⓈ-M error payload.
    pub fn from_binance_code(code: i64, msg: String) -> Self {
        match code {
            -2019 => VenueError::MarginInsufficient { code, msg },
            -1013 | -4003 | -4004 | -4005 => VenueError::QtyOutOfBounds { code, msg },
            -4164 => VenueError::NotionalTooSmall { code, msg },
            -2021 => VenueError::WouldImmediatelyTrigger { code, msg },
            -1121 => VenueError::SymbolUnsupported(msg),
            -2014 | -2015 => VenueError::PermissionDenied { code, msg },
            -1003 | -1015 => VenueError::RateLimited { code, msg },
            -2011 | -2013 => VenueError::OrderNotFound { code, msg },
            _ => VenueError::Venue { code, msg },
        }
    }

    /// Classify a KuCoin Futures error payload (string codes).
    pub fn from_kucoin_code(code: &str, msg: String) -> Self {
        match code {
            "300003" | "200004" => VenueError::MarginInsufficient { code: 0, msg },
            "100001" => VenueError::QtyOutOfBounds { code: 0, msg },
            "300012" => VenueError::SymbolUnsupported(msg),
            "400003" | "400004" | "400005" | "400007" => {
                VenueError::PermissionDenied { code: 0, msg }
            }
            "429000" => VenueError::RateLimited { code: 0, msg },
            "404000" => VenueError::OrderNotFound { code: 0, msg },
            other => VenueError::Venue {
                code: other.parse().unwrap_or(0),
                msg,
            },
        }
    }

    /// Maps to the trade-row failure label, when this error is a
    /// placement-failure kind at all.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            VenueError::MarginInsufficient { .. } => Some(FailureKind::MarginInsufficient),
            VenueError::QtyOutOfBounds { .. } => Some(FailureKind::QtyOutOfBounds),
            VenueError::NotionalTooSmall { .. } => Some(FailureKind::NotionalTooSmall),
            VenueError::WouldImmediatelyTrigger { .. } => {
                Some(FailureKind::WouldImmediatelyTrigger)
            }
            VenueError::SymbolUnsupported(_) => Some(FailureKind::SymbolUnsupported),
            VenueError::PermissionDenied { .. } => Some(FailureKind::PermissionDenied),
            VenueError::RateLimited { .. }
            | VenueError::Transport(_)
            | VenueError::ConnectionInterrupted => Some(FailureKind::Transient),
            _ => None,
        }
    }

    /// True when an `open_position` attempt should move the trade row to a
    /// terminal FAILED/UNFILLED state. Probe-only kinds and transient
    /// transport faults are excluded.
    pub fn is_terminal_placement_failure(&self) -> bool {
        matches!(
            self,
            VenueError::MarginInsufficient { .. }
                | VenueError::QtyOutOfBounds { .. }
                | VenueError::NotionalTooSmall { .. }
                | VenueError::WouldImmediatelyTrigger { .. }
                | VenueError::SymbolUnsupported(_)
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, VenueError::RateLimited { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VenueError::RateLimited { .. }
                | VenueError::Transport(_)
                | VenueError::ConnectionInterrupted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_codes_classify() {
        assert!(matches!(
            VenueError::from_binance_code(-2019, "margin".into()),
            VenueError::MarginInsufficient { .. }
        ));
        assert!(matches!(
            VenueError::from_binance_code(-2015, "bad key".into()),
            VenueError::PermissionDenied { .. }
        ));
        assert!(matches!(
            VenueError::from_binance_code(-1003, "too many".into()),
            VenueError::RateLimited { .. }
        ));
    }

    #[test]
    fn probe_errors_are_not_terminal() {
        let err = VenueError::from_binance_code(-2015, "Invalid API-key permissions".into());
        assert!(!err.is_terminal_placement_failure());
        assert_eq!(err.failure_kind(), Some(FailureKind::PermissionDenied));
    }

    #[test]
    fn hard_rejections_are_terminal() {
        for code in [-2019, -1013, -4164, -2021, -1121] {
            assert!(
                VenueError::from_binance_code(code, "x".into()).is_terminal_placement_failure(),
                "code {code} must be terminal"
            );
        }
    }
}
