//! Trade row and lifecycle
//!
//! One trade row per initial signal. Status transitions are the single
//! source of truth for what a trade may do next; everything that mutates
//! a row goes through [`TradeStatus::can_transition_to`] checks in the
//! persistence layer.

use serde::{Deserialize, Serialize};

use super::{OrderKind, ParsedSignal, PositionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "PARTIALLY_CLOSED")]
    PartiallyClosed,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "UNFILLED")]
    Unfilled,
    #[serde(rename = "CANCELED")]
    Canceled,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Open => "OPEN",
            TradeStatus::PartiallyClosed => "PARTIALLY_CLOSED",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Failed => "FAILED",
            TradeStatus::Unfilled => "UNFILLED",
            TradeStatus::Canceled => "CANCELED",
            TradeStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<TradeStatus> {
        match s {
            "PENDING" => Some(TradeStatus::Pending),
            "OPEN" => Some(TradeStatus::Open),
            "PARTIALLY_CLOSED" => Some(TradeStatus::PartiallyClosed),
            "CLOSED" => Some(TradeStatus::Closed),
            "FAILED" => Some(TradeStatus::Failed),
            "UNFILLED" => Some(TradeStatus::Unfilled),
            "CANCELED" => Some(TradeStatus::Canceled),
            "EXPIRED" => Some(TradeStatus::Expired),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Closed
                | TradeStatus::Failed
                | TradeStatus::Canceled
                | TradeStatus::Expired
                | TradeStatus::Unfilled
        )
    }

    /// States holding a live venue position.
    pub fn is_live(&self) -> bool {
        matches!(self, TradeStatus::Open | TradeStatus::PartiallyClosed)
    }

    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        if *self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Open | Unfilled | Failed | Canceled | Expired),
            Open => matches!(next, PartiallyClosed | Closed | Canceled | Expired),
            PartiallyClosed => matches!(next, Closed),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectiveKind {
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "SL")]
    StopLoss,
}

/// One protective order installed for a trade, as persisted in the
/// `tp_sl_orders` JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectiveOrder {
    pub order_id: String,
    pub kind: ProtectiveKind,
    pub trigger_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
}

/// The persistent trade row. `original_order_response` is write-once:
/// the first successful placement payload is preserved verbatim and later
/// probes may only touch `order_status_response` / `binance_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub discord_id: String,
    /// Millisecond instant the signal was emitted; the idempotent binding
    /// key for re-deliveries.
    pub timestamp_ms: i64,
    pub coin_symbol: String,
    pub trader: Option<String>,
    pub parsed_signal: ParsedSignal,
    pub signal_type: OrderKind,
    pub position_type: PositionType,
    pub status: TradeStatus,
    pub entry_price: Option<f64>,
    pub binance_entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub position_size: Option<f64>,
    pub exchange_order_id: Option<String>,
    pub original_order_response: Option<serde_json::Value>,
    pub binance_response: Option<serde_json::Value>,
    pub order_status_response: Option<serde_json::Value>,
    pub tp_sl_orders: Vec<ProtectiveOrder>,
    pub pnl_usd: Option<f64>,
    pub sync_error_count: i64,
    pub sync_issues: Vec<String>,
    pub manual_verification_needed: bool,
    /// Epoch ms; set once from the first fill event (or signal time).
    pub created_at: Option<i64>,
    /// Epoch ms; set once when the trade fully closes.
    pub closed_at: Option<i64>,
    pub updated_at: Option<String>,
    pub merged_into_trade_id: Option<i64>,
    pub merge_reason: Option<String>,
    pub merged_at: Option<String>,
}

impl Trade {
    /// Effective entry for breakeven math: the venue-reported fill price
    /// when known, else the parsed signal price.
    pub fn effective_entry(&self) -> Option<f64> {
        self.binance_entry_price
            .or(self.entry_price)
            .or_else(|| self.parsed_signal.entry_prices.first().copied())
    }

    /// Venue order side for entering this position.
    pub fn entry_side(&self) -> venue_client::OrderSide {
        match self.position_type {
            PositionType::Long => venue_client::OrderSide::Buy,
            PositionType::Short => venue_client::OrderSide::Sell,
        }
    }

    /// Venue order side for reducing/exiting this position.
    pub fn exit_side(&self) -> venue_client::OrderSide {
        self.entry_side().opposite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use TradeStatus::*;
        assert!(Pending.can_transition_to(Open));
        assert!(Pending.can_transition_to(Unfilled));
        assert!(Open.can_transition_to(PartiallyClosed));
        assert!(Open.can_transition_to(Closed));
        assert!(PartiallyClosed.can_transition_to(Closed));

        assert!(!Closed.can_transition_to(Open));
        assert!(!Failed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Pending));
        assert!(!PartiallyClosed.can_transition_to(Open));
    }

    #[test]
    fn terminal_states() {
        for status in [
            TradeStatus::Closed,
            TradeStatus::Failed,
            TradeStatus::Canceled,
            TradeStatus::Expired,
            TradeStatus::Unfilled,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_live());
        }
        assert!(TradeStatus::Open.is_live());
        assert!(TradeStatus::PartiallyClosed.is_live());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TradeStatus::Pending,
            TradeStatus::Open,
            TradeStatus::PartiallyClosed,
            TradeStatus::Closed,
            TradeStatus::Failed,
            TradeStatus::Unfilled,
            TradeStatus::Canceled,
            TradeStatus::Expired,
        ] {
            assert_eq!(TradeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TradeStatus::parse("NONSENSE"), None);
    }
}
