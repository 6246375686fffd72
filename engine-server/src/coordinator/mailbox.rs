//! Per-symbol mailboxes
//!
//! Every mutating coordinator operation for a symbol goes through that
//! symbol's mailbox: one unbounded channel drained by one worker task, so
//! open/close/update on the same symbol can never interleave. Different
//! symbols run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::error;

use crate::models::AlertAction;

#[derive(Debug, Clone)]
pub enum SymbolCommand {
    OpenPosition {
        trade_id: i64,
    },
    ExecuteAlert {
        trade_id: i64,
        alert_id: i64,
        action: AlertAction,
    },
}

#[async_trait]
pub trait SymbolCommandHandler: Send + Sync + 'static {
    async fn handle(&self, coin_symbol: &str, command: SymbolCommand);
}

pub struct SymbolMailboxes<H: SymbolCommandHandler> {
    handler: Arc<H>,
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<SymbolCommand>>>,
}

impl<H: SymbolCommandHandler> SymbolMailboxes<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue a command on the symbol's serial lane, spawning the worker
    /// on first use.
    pub async fn dispatch(&self, coin_symbol: &str, command: SymbolCommand) {
        let mut senders = self.senders.lock().await;
        let sender = senders.entry(coin_symbol.to_string()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<SymbolCommand>();
            let handler = self.handler.clone();
            let symbol = coin_symbol.to_string();
            tokio::spawn(async move {
                while let Some(command) = rx.recv().await {
                    handler.handle(&symbol, command).await;
                }
            });
            tx
        });
        if sender.send(command).is_err() {
            // The worker died; replace the lane on the next dispatch.
            error!(%coin_symbol, "symbol mailbox worker gone, dropping lane");
            senders.remove(coin_symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;

    /// Records (symbol, phase) markers so the test can assert that no two
    /// commands for the same symbol ever overlap.
    struct RecordingHandler {
        events: StdMutex<Vec<(String, &'static str, i64)>>,
    }

    #[async_trait]
    impl SymbolCommandHandler for RecordingHandler {
        async fn handle(&self, coin_symbol: &str, command: SymbolCommand) {
            let id = match command {
                SymbolCommand::OpenPosition { trade_id } => trade_id,
                SymbolCommand::ExecuteAlert { trade_id, .. } => trade_id,
            };
            self.events
                .lock()
                .unwrap()
                .push((coin_symbol.to_string(), "start", id));
            // Yield a few times so interleaving would show if it could.
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.events
                .lock()
                .unwrap()
                .push((coin_symbol.to_string(), "end", id));
        }
    }

    #[tokio::test]
    async fn same_symbol_commands_never_interleave() {
        let handler = Arc::new(RecordingHandler {
            events: StdMutex::new(Vec::new()),
        });
        let mailboxes = SymbolMailboxes::new(handler.clone());

        for trade_id in 0..8 {
            mailboxes
                .dispatch("HYPE", SymbolCommand::OpenPosition { trade_id })
                .await;
            mailboxes
                .dispatch("SOL", SymbolCommand::OpenPosition { trade_id })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = handler.events.lock().unwrap();
        // Per symbol: strictly alternating start/end in dispatch order.
        for symbol in ["HYPE", "SOL"] {
            let lane: Vec<_> = events.iter().filter(|(s, _, _)| s == symbol).collect();
            assert_eq!(lane.len(), 16);
            for (i, (_, phase, id)) in lane.iter().enumerate() {
                assert_eq!(*phase, if i % 2 == 0 { "start" } else { "end" });
                assert_eq!(*id, (i / 2) as i64);
            }
        }
    }
}
