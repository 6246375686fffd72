//! Signal / alert router
//!
//! Drains the ingress queue. A record with a parent reference is a
//! follow-up alert; anything else is an initial signal. Initial signals
//! bind to their trade row by the millisecond timestamp window, which
//! makes re-delivery idempotent: the same signal can only ever find (or
//! create) the same row, and only a PENDING row dispatches a placement.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{error, info, warn};

use crate::coordinator::{SymbolCommand, SymbolCommandHandler, SymbolMailboxes};
use crate::db::Database;
use crate::models::{
    classify_alert, parse_signal_timestamp, InboundSignal, ParsedSignal, TradeStatus,
};

pub struct SignalRouter<H: SymbolCommandHandler> {
    db: Arc<Database>,
    mailboxes: Arc<SymbolMailboxes<H>>,
}

impl<H: SymbolCommandHandler> SignalRouter<H> {
    pub fn new(db: Arc<Database>, mailboxes: Arc<SymbolMailboxes<H>>) -> Self {
        Self { db, mailboxes }
    }

    pub async fn handle_message(&self, msg: InboundSignal) {
        let result = if msg.is_follow_up() {
            self.handle_alert(&msg).await
        } else {
            self.handle_signal(&msg).await
        };
        if let Err(err) = result {
            error!(?err, discord_id = ?msg.discord_id, "inbound message handling failed");
        }
    }

    /// Bind an initial signal to its trade row and dispatch the open.
    async fn handle_signal(&self, msg: &InboundSignal) -> Result<()> {
        let timestamp_ms = parse_signal_timestamp(&msg.timestamp)?;

        let Some(structured) = msg.structured.as_deref() else {
            warn!(timestamp = %msg.timestamp, "signal without structured payload dropped");
            return Ok(());
        };
        let parsed = match ParsedSignal::parse(structured, &msg.content) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(?err, %structured, "unparseable structured signal dropped");
                return Ok(());
            }
        };

        // The trade row may have been pre-created at the exact signal
        // instant; otherwise this delivery creates it.
        let trade = match self.db.find_trade_by_timestamp(timestamp_ms).await? {
            Some(existing) => {
                info!(
                    trade_id = existing.id,
                    status = existing.status.as_str(),
                    "signal re-bound to existing row"
                );
                existing
            }
            None => {
                let discord_id = msg
                    .discord_id
                    .clone()
                    .unwrap_or_else(|| format!("ts-{timestamp_ms}"));
                self.db
                    .insert_trade(&discord_id, timestamp_ms, msg.trader.as_deref(), &parsed)
                    .await?
            }
        };

        // Only a PENDING row may attempt placement; everything else is a
        // re-delivery of an already-processed signal.
        if trade.status != TradeStatus::Pending {
            return Ok(());
        }
        self.mailboxes
            .dispatch(
                &trade.coin_symbol,
                SymbolCommand::OpenPosition { trade_id: trade.id },
            )
            .await;
        Ok(())
    }

    /// Record a follow-up alert and dispatch it to the coordinator when
    /// its parent still holds (or may hold) a position.
    async fn handle_alert(&self, msg: &InboundSignal) -> Result<()> {
        let timestamp_ms = parse_signal_timestamp(&msg.timestamp)?;
        let parent_ref = msg.parent_ref.as_deref().unwrap_or_default();

        // The alert row is retained no matter what happens next.
        let alert = self
            .db
            .insert_alert(
                timestamp_ms,
                msg.discord_id.as_deref(),
                parent_ref,
                &msg.content,
                msg.trader.as_deref(),
            )
            .await?;

        let Some(parent) = self.db.get_trade_by_discord_id(parent_ref).await? else {
            self.db
                .update_alert_parsed(alert.id, &json!({ "skipped": "unknown parent trade" }))
                .await?;
            return Ok(());
        };

        if matches!(
            parent.status,
            TradeStatus::Failed | TradeStatus::Unfilled | TradeStatus::Canceled | TradeStatus::Expired
        ) {
            self.db
                .update_alert_parsed(alert.id, &json!({ "skipped": "no open position" }))
                .await?;
            return Ok(());
        }

        let Some(action) = classify_alert(&msg.content) else {
            self.db
                .update_alert_parsed(alert.id, &json!({ "skipped": "unclassified content" }))
                .await?;
            return Ok(());
        };

        self.db
            .update_alert_parsed(alert.id, &json!({ "action": action.as_str() }))
            .await?;
        self.mailboxes
            .dispatch(
                &parent.coin_symbol,
                SymbolCommand::ExecuteAlert {
                    trade_id: parent.id,
                    alert_id: alert.id,
                    action,
                },
            )
            .await;
        Ok(())
    }
}
