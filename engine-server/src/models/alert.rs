//! Follow-up alert rows and the keyword action classifier
//!
//! Alert content is mapped to an action by keyword matching, never by a
//! language model. The only genuinely ambiguous pair is "stopped out"
//! (close everything) versus "stopped be" (move the stop to breakeven);
//! a breakeven token near the stop keyword wins.

use serde::{Deserialize, Serialize};

/// The structured action extracted from an alert's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertAction {
    #[serde(rename = "stop_loss_hit")]
    StopLossHit,
    #[serde(rename = "position_closed")]
    PositionClosed,
    #[serde(rename = "take_profit_1")]
    TakeProfit1,
    #[serde(rename = "take_profit_2")]
    TakeProfit2,
    #[serde(rename = "stop_loss_update")]
    StopLossUpdate,
    #[serde(rename = "order_cancelled")]
    OrderCancelled,
}

/// What the coordinator does for an action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertExecution {
    /// Close this percentage of the live position at market.
    ClosePercent(f64),
    /// Cancel the current SL and re-place it at the effective entry.
    MoveStopToBreakeven,
    /// Cancel the pending entry order.
    CancelEntry,
}

impl AlertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertAction::StopLossHit => "stop_loss_hit",
            AlertAction::PositionClosed => "position_closed",
            AlertAction::TakeProfit1 => "take_profit_1",
            AlertAction::TakeProfit2 => "take_profit_2",
            AlertAction::StopLossUpdate => "stop_loss_update",
            AlertAction::OrderCancelled => "order_cancelled",
        }
    }

    pub fn execution(&self) -> AlertExecution {
        match self {
            AlertAction::StopLossHit | AlertAction::PositionClosed => {
                AlertExecution::ClosePercent(100.0)
            }
            AlertAction::TakeProfit1 => AlertExecution::ClosePercent(50.0),
            AlertAction::TakeProfit2 => AlertExecution::ClosePercent(100.0),
            AlertAction::StopLossUpdate => AlertExecution::MoveStopToBreakeven,
            AlertAction::OrderCancelled => AlertExecution::CancelEntry,
        }
    }
}

/// Number of characters after a stop keyword within which a breakeven
/// token flips the classification to `stop_loss_update`.
const BREAKEVEN_WINDOW: usize = 24;

/// Classify alert content into an action. Returns `None` when no known
/// keyword matches; such alerts are stored but not executed.
pub fn classify_alert(content: &str) -> Option<AlertAction> {
    let lower = content.to_lowercase();

    // Explicit breakeven phrasings first.
    if lower.contains("stops moved to be")
        || lower.contains("stop moved to be")
        || lower.contains("sl to be")
        || lower.contains("sl moved to be")
    {
        return Some(AlertAction::StopLossUpdate);
    }

    // "stopped be" / "stop ... breakeven" beats "stopped out".
    if let Some(pos) = lower.find("stop") {
        let window_end = (pos + BREAKEVEN_WINDOW).min(lower.len());
        if has_breakeven_token(&lower[pos..window_end]) {
            return Some(AlertAction::StopLossUpdate);
        }
    }

    if lower.contains("stopped out") || lower.contains("stop loss") || lower.contains("sl hit") {
        return Some(AlertAction::StopLossHit);
    }
    if lower.contains("limit order cancelled") || lower.contains("limit order canceled") {
        return Some(AlertAction::OrderCancelled);
    }
    if lower.contains("tp1") {
        return Some(AlertAction::TakeProfit1);
    }
    if lower.contains("tp2") {
        return Some(AlertAction::TakeProfit2);
    }
    if lower.contains("closed") {
        return Some(AlertAction::PositionClosed);
    }
    None
}

fn has_breakeven_token(window: &str) -> bool {
    window
        .split(|c: char| !c.is_alphanumeric() && c != '/')
        .any(|word| matches!(word, "be" | "b/e" | "breakeven"))
}

/// The persistent alert row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: i64,
    pub timestamp_ms: i64,
    pub discord_id: Option<String>,
    /// Parent trade's discord id.
    pub trade: String,
    pub content: String,
    pub trader: Option<String>,
    pub parsed_alert: Option<serde_json::Value>,
    pub binance_response: Option<serde_json::Value>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}
