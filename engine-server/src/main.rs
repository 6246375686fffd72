use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use venue_client::binance::BinanceFuturesClient;
use venue_client::kucoin::KuCoinFuturesClient;
use venue_client::FuturesVenue;

use perp_pilot_engine_server::api::{create_router, AppState};
use perp_pilot_engine_server::config::{Config, LoggingConfig};
use perp_pilot_engine_server::coordinator::{SymbolMailboxes, TradeCoordinator};
use perp_pilot_engine_server::db::Database;
use perp_pilot_engine_server::fees::{FeeCalculator, FeeMode};
use perp_pilot_engine_server::ingestor::EventIngestor;
use perp_pilot_engine_server::models::InboundSignal;
use perp_pilot_engine_server::router::SignalRouter;
use perp_pilot_engine_server::sync::SyncScheduler;

fn init_logging(config: &LoggingConfig) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if config.enabled {
        use tracing_appender::rolling;

        if let Err(e) = std::fs::create_dir_all(&config.directory) {
            eprintln!("Failed to create log directory {}: {}", config.directory, e);
        }
        let file_appender = match config.rotation.as_str() {
            "hourly" => rolling::hourly(&config.directory, &config.file_prefix),
            "never" => rolling::never(&config.directory, &config.file_prefix),
            _ => rolling::daily(&config.directory, &config.file_prefix),
        };
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .init();
        // Keep the appender guard alive for the process lifetime.
        std::mem::forget(guard);
    } else {
        subscriber.init();
    }
}

fn build_venue(config: &Config) -> Arc<dyn FuturesVenue> {
    if config.binance.enabled {
        Arc::new(BinanceFuturesClient::new(
            &config.binance.api_url,
            &config.binance.stream_url,
            &config.binance.api_key,
            &config.binance.api_secret,
        ))
    } else {
        Arc::new(KuCoinFuturesClient::new(
            &config.kucoin.api_url,
            &config.kucoin.api_key,
            &config.kucoin.api_secret,
            &config.kucoin.api_passphrase,
        ))
    }
}

fn build_fee_calculator(config: &Config) -> FeeCalculator {
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    if config.fees.use_fixed_calculator {
        FeeCalculator::fixed(config.fees.fixed_fee_rate)
    } else {
        FeeCalculator::new(FeeMode::Tiered {
            maker: Decimal::from_f64(config.fees.maker_rate).unwrap_or_default(),
            taker: Decimal::from_f64(config.fees.taker_rate).unwrap_or_default(),
            bnb_discount: config.fees.bnb_discount,
        })
    }
}

async fn run(config: Config) -> Result<()> {
    // DATABASE_URL environment variable overrides config.toml
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database.url.clone());
    let db = Arc::new(
        Database::new(&database_url)
            .await
            .context("database initialization failed")?,
    );
    tracing::info!("Database initialized: {}", database_url);

    let venue = build_venue(&config);
    tracing::info!("Venue adapter ready: {}", venue.venue_name());

    let coordinator = Arc::new(TradeCoordinator::new(
        db.clone(),
        venue.clone(),
        build_fee_calculator(&config),
        config.trading.clone(),
    ));
    let mailboxes = Arc::new(SymbolMailboxes::new(coordinator));
    let router = Arc::new(SignalRouter::new(db.clone(), mailboxes));

    // Ingress queue: handlers acknowledge, this task does the work.
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<InboundSignal>();
    {
        let router = router.clone();
        tokio::spawn(async move {
            while let Some(msg) = signal_rx.recv().await {
                router.handle_message(msg).await;
            }
        });
    }
    tracing::info!("Signal router task spawned");

    let scheduler = SyncScheduler::new(db.clone(), venue.clone(), &config.scheduler);
    scheduler.spawn_all();

    let ingestor = EventIngestor::new(
        db.clone(),
        venue.clone(),
        scheduler.clone(),
        config.stream.clone(),
    );
    let ingestor_status = ingestor.status();
    tokio::spawn(async move {
        if let Err(err) = ingestor.run().await {
            tracing::error!(?err, "event ingestor stopped");
        }
    });
    tracing::info!("Event ingestor spawned");

    let state = AppState {
        db,
        signal_tx,
        scheduler,
        ingestor_status,
        started_at: Instant::now(),
    };
    let app = create_router(state);

    let address = config.server_address();
    tracing::info!("HTTP server listening on {}", address);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Determine config directory from CONFIG_DIR environment variable,
    // falling back to the executable's directory, then the cwd.
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_string_lossy().into_owned()))
            .unwrap_or_else(|| ".".to_string())
    });
    let config_base = format!("{}/config", config_dir);

    let config = match Config::from_file(&config_base) {
        Ok(cfg) => {
            eprintln!("Configuration loaded from {}", config_base);
            cfg
        }
        Err(e) => {
            eprintln!("Failed to load configuration: {}, using defaults", e);
            Config::default()
        }
    };

    init_logging(&config.logging);
    tracing::info!("Starting perp-pilot server...");

    // Exit code 1: fatal configuration or credential problem.
    if let Err(err) = config.validate() {
        tracing::error!(?err, "invalid configuration");
        return ExitCode::from(1);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(?err, "fatal error");
            // Exit code 2: unrecoverable persistence (or runtime) error.
            ExitCode::from(2)
        }
    }
}
