use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickloom::application::services::{
    Agent, AgentCapabilities, CancellationToken, MarketRegistry, Runner, Session,
};
use tickloom::config::{BinanceConfig, RunnerConfig, StoreConfig};
use tickloom::domain::entities::market_config::MarketConfig;
use tickloom::domain::entities::trade::OrderSide;
use tickloom::domain::errors::EngineError;
use tickloom::domain::repositories::event_stream::EventStream;
use tickloom::domain::value_objects::time::{time_string, MicroSec};
use tickloom::infrastructure::binance::{BinanceClient, BinanceTradeStream};
use tickloom::persistence::{init_database, DatabaseConfig};

/// Logs the market once per clock; never trades
#[derive(Default)]
struct LoggingAgent {
    ticks: u64,
}

#[async_trait]
impl Agent for LoggingAgent {
    fn name(&self) -> &str {
        "logger"
    }

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            on_init: true,
            on_tick: true,
            on_clock: true,
            ..AgentCapabilities::default()
        }
    }

    async fn on_init(&mut self, session: &mut Session) -> Result<(), EngineError> {
        info!(
            "Agent ready at {} on {}",
            time_string(session.current_time()),
            session.config().trade_symbol
        );
        Ok(())
    }

    async fn on_tick(
        &mut self,
        _session: &mut Session,
        _side: OrderSide,
        _price: f64,
        _size: f64,
    ) -> Result<(), EngineError> {
        self.ticks += 1;
        Ok(())
    }

    async fn on_clock(&mut self, session: &mut Session, clock: MicroSec) -> Result<(), EngineError> {
        let bars = session.ohlcv(60, 1).await?;
        if let Some(bar) = bars.last() {
            info!(
                "{} close {} volume {:.4} bid {} ask {} ({} ticks)",
                time_string(clock),
                bar.close,
                bar.volume,
                session.bid_edge(),
                session.ask_edge(),
                self.ticks
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickloom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = init_database(&DatabaseConfig::from_env()).await?;
    let registry = Arc::new(MarketRegistry::new(pool, StoreConfig::from_env()));

    let binance_config = BinanceConfig::from_env();
    let ws_endpoint = binance_config.public_ws_endpoint.clone();
    let client = Arc::new(BinanceClient::new(binance_config)?);

    let market_config = MarketConfig::from_env();
    let key = market_config.key();
    let market = registry.open(market_config.clone(), client).await?;

    let runner_config = RunnerConfig::from_env();
    let prepare_days = runner_config.prepare_days;
    let cancel = CancellationToken::new();
    let runner = Runner::new(runner_config, registry.clone(), cancel.clone());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping the run");
                cancel.cancel();
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    let mut agent = LoggingAgent::default();
    let mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "backtest".to_string());
    let report = match mode.as_str() {
        "dry" => {
            let streams: Vec<Box<dyn EventStream>> =
                vec![Box::new(BinanceTradeStream::new(&ws_endpoint, &market_config))];
            runner.dry_run(&key, &mut agent, streams).await?
        }
        other => {
            if other != "backtest" {
                warn!("Unknown RUN_MODE '{}', running a backtest", other);
            }
            let download = market.download(prepare_days, false).await?;
            for failure in &download.failures {
                warn!("Download incomplete: {}", failure);
            }
            if let Err(e) = market.check_coverage().await {
                warn!("{}", e);
            }
            runner.back_test(&key, &mut agent, 0, 0).await?
        }
    };

    info!(
        "{} ended ({:?}) after {} events from {} to {}; {} {} free, {} {} free",
        report.mode,
        report.reason,
        report.counters.loop_count,
        time_string(report.first_time),
        time_string(report.last_time),
        report.account.home_free(),
        market_config.home_currency,
        report.account.foreign_free(),
        market_config.foreign_currency
    );
    Ok(())
}
