//! Balance sync loop

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use venue_client::FuturesVenue;

use crate::db::Database;

use super::SyncTask;

pub struct BalanceSync {
    db: Arc<Database>,
    venue: Arc<dyn FuturesVenue>,
}

impl BalanceSync {
    pub fn new(db: Arc<Database>, venue: Arc<dyn FuturesVenue>) -> Self {
        Self { db, venue }
    }
}

#[async_trait]
impl SyncTask for BalanceSync {
    async fn run(&self) -> Result<()> {
        let platform = self.venue.venue_name();
        for balance in self.venue.get_balances().await? {
            self.db
                .upsert_balance(
                    platform,
                    "futures",
                    &balance.asset,
                    balance.free,
                    balance.locked,
                    balance.total,
                    balance.unrealized_pnl,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use venue_client::AssetBalance;

    use super::*;
    use crate::test_support::MockVenue;

    #[tokio::test]
    async fn balances_are_upserted_per_asset() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let mut venue = MockVenue::new();
        venue.expect_venue_name().return_const("binance");
        venue.expect_get_balances().returning(|| {
            Ok(vec![
                AssetBalance {
                    asset: "USDT".to_string(),
                    free: 900.0,
                    locked: 100.0,
                    total: 1000.0,
                    unrealized_pnl: -3.5,
                },
                AssetBalance {
                    asset: "BNB".to_string(),
                    free: 1.0,
                    locked: 0.0,
                    total: 1.0,
                    unrealized_pnl: 0.0,
                },
            ])
        });

        let sync = BalanceSync::new(db.clone(), Arc::new(venue));
        sync.run().await.unwrap();
        sync.run().await.unwrap();

        let balances = db.list_balances().await.unwrap();
        assert_eq!(balances.len(), 2);
        let usdt = balances.iter().find(|b| b.asset == "USDT").unwrap();
        assert_eq!(usdt.free, 900.0);
        assert_eq!(usdt.platform, "binance");
    }
}
