//! Scheduler driving an agent through a run
//!
//! All modes share one delivery order per trade print:
//!
//! 1. `on_clock` for every clock boundary crossed since the previous print
//! 2. the print updates the session (time, edges, local matching)
//! 3. `on_tick`
//! 4. `on_update` for each order transition due at this boundary, then
//!    `on_account_update` once if any of them moved balances
//!
//! Backtests read the trade store in time order and fail fast on any agent
//! error. Live runs consume a single queue fed by stream actors; recoverable
//! errors are logged and the run continues.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::actors::stream_actor::{RunEvent, StreamActor};
use crate::config::RunnerConfig;
use crate::domain::entities::account::Account;
use crate::domain::entities::market_config::MarketKey;
use crate::domain::entities::order::{Order, OrderStatus};
use crate::domain::entities::trade::Trade;
use crate::domain::errors::EngineError;
use crate::domain::repositories::event_stream::{EventStream, StreamMessage};
use crate::domain::repositories::exchange_client::OrderGateway;
use crate::domain::repositories::market_query::MarketQuery;
use crate::domain::services::order_engine::OrderStats;
use crate::domain::value_objects::time::{self, floor_sec, time_string, MicroSec};

use super::agent::{check_agent, Agent, AgentCapabilities};
use super::cancellation::CancellationToken;
use super::market::Market;
use super::registry::MarketRegistry;
use super::session::{ExecuteMode, Session};

/// Live trades are persisted in batches of this size
const INGEST_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Historical data or every live stream ran out
    EndOfData,
    /// The requested end time was reached
    EndTime,
    /// The configured duration elapsed
    ExecuteTime,
    /// The cancellation token fired
    Cancelled,
}

/// Callback and event counters of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub on_tick: u64,
    pub on_clock: u64,
    pub on_update: u64,
    pub on_account_update: u64,
    pub loop_count: u64,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: ExecuteMode,
    pub reason: TerminationReason,
    pub counters: RunCounters,
    pub first_time: MicroSec,
    pub last_time: MicroSec,
    pub account: Account,
    pub stats: OrderStats,
    /// Local orders cancelled at teardown, or venue orders when requested
    pub flushed: Vec<Order>,
}

/// Event delivery for one run
struct Driver<'a> {
    session: Session,
    agent: &'a mut dyn Agent,
    capabilities: AgentCapabilities,
    counters: RunCounters,
    fail_fast: bool,
    warmup_steps: usize,
    warmup: usize,
    initialized: bool,
    last_clock: MicroSec,
    first_time: MicroSec,
    last_time: MicroSec,
}

impl<'a> Driver<'a> {
    fn new(
        session: Session,
        agent: &'a mut dyn Agent,
        capabilities: AgentCapabilities,
        fail_fast: bool,
        warmup_steps: usize,
    ) -> Self {
        Self {
            session,
            agent,
            capabilities,
            counters: RunCounters::default(),
            fail_fast,
            warmup_steps,
            warmup: 0,
            initialized: false,
            last_clock: 0,
            first_time: 0,
            last_time: 0,
        }
    }

    /// Decide whether a callback failure ends the run.
    fn check(&self, callback: &str, result: Result<(), EngineError>) -> Result<(), EngineError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if !self.fail_fast && e.is_recoverable() => {
                warn!("{} of {} failed, continuing: {}", callback, self.agent.name(), e);
                Ok(())
            }
            Err(e) => {
                error!("{} of {} failed: {}", callback, self.agent.name(), e);
                Err(e)
            }
        }
    }

    async fn init(&mut self) -> Result<(), EngineError> {
        self.initialized = true;
        info!(
            "Warm-up done after {} events at {} (bid {}, ask {})",
            self.warmup,
            time_string(self.session.current_time()),
            self.session.bid_edge(),
            self.session.ask_edge()
        );
        if self.capabilities.on_init {
            let result = self.agent.on_init(&mut self.session).await;
            self.check("on_init", result)?;
        }
        Ok(())
    }

    /// Feed one trade print, warming up first if needed.
    async fn step(&mut self, trade: &Trade) -> Result<(), EngineError> {
        self.counters.loop_count += 1;
        if self.first_time == 0 {
            self.first_time = trade.time;
        }
        self.last_time = trade.time;

        if !self.initialized {
            let updates = self.session.on_trade(trade).await?;
            if !updates.is_empty() {
                debug!("Dropping {} order updates during warm-up", updates.len());
            }
            self.warmup += 1;
            if self.session.book().is_ready() || self.warmup >= self.warmup_steps {
                self.init().await?;
            }
            return Ok(());
        }

        self.fire_clocks(trade.time).await?;

        let updates = match self.session.on_trade(trade).await {
            Ok(updates) => updates,
            Err(e) => {
                self.check("session update", Err(e))?;
                Vec::new()
            }
        };

        if self.capabilities.on_tick {
            self.counters.on_tick += 1;
            let result = self
                .agent
                .on_tick(&mut self.session, trade.side, trade.price, trade.size)
                .await;
            self.check("on_tick", result)?;
        }

        self.deliver_updates(updates, true).await
    }

    /// `on_clock` for every boundary crossed up to `t`. The first print only
    /// sets the clock.
    async fn fire_clocks(&mut self, t: MicroSec) -> Result<(), EngineError> {
        if !self.capabilities.on_clock {
            return Ok(());
        }
        let interval = self.session.clock_interval_sec().max(1);
        let clock = floor_sec(t, interval);
        if self.last_clock == 0 {
            self.last_clock = clock;
            return Ok(());
        }

        loop {
            let next = floor_sec(self.last_clock, interval) + time::sec(interval);
            if next > clock {
                break;
            }
            self.last_clock = next;
            self.session.set_time(next);
            self.counters.on_clock += 1;
            let result = self.agent.on_clock(&mut self.session, next).await;
            self.check("on_clock", result)?;
        }
        Ok(())
    }

    /// `on_update` per order, then `on_account_update` once if a fill,
    /// cancel or expiry moved balances and `with_account` is set.
    async fn deliver_updates(&mut self, updates: Vec<Order>, with_account: bool) -> Result<(), EngineError> {
        let balance_changed = updates.iter().any(|o| o.status != OrderStatus::New);

        for order in updates {
            if self.capabilities.on_update {
                self.counters.on_update += 1;
                let result = self.agent.on_update(&mut self.session, order).await;
                self.check("on_update", result)?;
            }
        }

        if with_account && balance_changed {
            self.deliver_account().await?;
        }
        Ok(())
    }

    async fn deliver_account(&mut self) -> Result<(), EngineError> {
        if self.capabilities.on_account_update {
            self.counters.on_account_update += 1;
            let account = self.session.account().clone();
            let result = self.agent.on_account_update(&mut self.session, account).await;
            self.check("on_account_update", result)?;
        }
        Ok(())
    }

    fn finish(self, reason: TerminationReason, flushed: Vec<Order>) -> RunReport {
        let report = RunReport {
            mode: self.session.mode(),
            reason,
            counters: self.counters,
            first_time: self.first_time,
            last_time: self.last_time,
            account: self.session.account().clone(),
            stats: self.session.stats(),
            flushed,
        };
        info!(
            "{} run of {} finished ({:?}): {} ticks, {} clocks, {} updates, {} account updates, {} events",
            report.mode,
            self.agent.name(),
            report.reason,
            report.counters.on_tick,
            report.counters.on_clock,
            report.counters.on_update,
            report.counters.on_account_update,
            report.counters.loop_count
        );
        report
    }
}

/// Runs agents against markets of a registry
pub struct Runner {
    config: RunnerConfig,
    registry: Arc<MarketRegistry>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(config: RunnerConfig, registry: Arc<MarketRegistry>, cancel: CancellationToken) -> Self {
        Self {
            config,
            registry,
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn initial_account(&self) -> Account {
        Account::new(self.config.initial_home_balance, self.config.initial_foreign_balance)
    }

    /// Replay `[start, end)` of the stored history; zeros mean the stored
    /// start or end.
    pub async fn back_test(
        &self,
        key: &MarketKey,
        agent: &mut dyn Agent,
        start: MicroSec,
        end: MicroSec,
    ) -> Result<RunReport, EngineError> {
        let capabilities = check_agent(agent)?;
        let market = self.registry.get(key).await?;

        let data_end = market.end_time().await?;
        let start = if start > 0 { start } else { market.start_time().await? };
        let (end, mut reason) = if end > 0 && end <= data_end {
            (end, TerminationReason::EndTime)
        } else {
            (if end > 0 { end } else { data_end }, TerminationReason::EndOfData)
        };
        info!(
            "Backtest of {} on {} from {} to {}",
            agent.name(),
            key,
            time_string(start),
            time_string(end)
        );

        let session = Session::local(
            ExecuteMode::Backtest,
            "backtest",
            market.clone(),
            self.initial_account(),
            self.config.clock_interval_sec,
        );
        let mut driver = Driver::new(session, agent, capabilities, true, self.config.warmup_steps);
        let limit = self.config.execute_limit_sec();
        let chunk = time::sec(self.config.backtest_chunk_sec.max(1));

        let mut cursor = start;
        'replay: while cursor < end {
            let chunk_end = (cursor + chunk).min(end);
            let trades = market.select_trades(cursor, chunk_end).await?;

            for trade in &trades {
                if self.cancel.is_cancelled() {
                    reason = TerminationReason::Cancelled;
                    break 'replay;
                }
                if let Some(limit) = limit {
                    if driver.first_time > 0 && trade.time >= driver.first_time + time::sec(limit) {
                        reason = TerminationReason::ExecuteTime;
                        break 'replay;
                    }
                }
                driver.step(trade).await?;
            }
            cursor = chunk_end;
        }

        let flushed = driver.session.flush_local();
        Ok(driver.finish(reason, flushed))
    }

    /// Paper trading on live data.
    pub async fn dry_run(
        &self,
        key: &MarketKey,
        agent: &mut dyn Agent,
        streams: Vec<Box<dyn EventStream>>,
    ) -> Result<RunReport, EngineError> {
        self.live_run(ExecuteMode::DryRun, key, agent, None, streams).await
    }

    /// Live trading through `gateway`.
    pub async fn real_run(
        &self,
        key: &MarketKey,
        agent: &mut dyn Agent,
        gateway: Arc<dyn OrderGateway>,
        streams: Vec<Box<dyn EventStream>>,
    ) -> Result<RunReport, EngineError> {
        self.live_run(ExecuteMode::RealRun, key, agent, Some(gateway), streams)
            .await
    }

    async fn live_run(
        &self,
        mode: ExecuteMode,
        key: &MarketKey,
        agent: &mut dyn Agent,
        gateway: Option<Arc<dyn OrderGateway>>,
        streams: Vec<Box<dyn EventStream>>,
    ) -> Result<RunReport, EngineError> {
        let capabilities = check_agent(agent)?;
        let market = self.registry.get(key).await?;
        info!("{} of {} on {} with {} streams", mode, agent.name(), key, streams.len());

        let (tx, mut rx) = mpsc::channel(self.config.stream_queue_size.max(1));
        let stop = CancellationToken::new();
        let handles: Vec<JoinHandle<()>> = streams
            .into_iter()
            .map(|stream| {
                StreamActor::spawn(
                    stream,
                    tx.clone(),
                    stop.clone(),
                    self.config.reconnect_initial_delay,
                    self.config.reconnect_max_delay,
                )
            })
            .collect();
        drop(tx);

        let prepared = self.prepare(mode, &market, gateway).await;
        let session = match prepared {
            Ok(session) => session,
            Err(e) => {
                shutdown_streams(&stop, handles).await;
                return Err(e);
            }
        };

        let mut driver = Driver::new(session, agent, capabilities, false, self.config.warmup_steps);
        let mut buffer: Vec<Trade> = Vec::new();
        let outcome = self.live_loop(&mut driver, &mut rx, &market, &mut buffer).await;

        shutdown_streams(&stop, handles).await;
        if let Err(e) = market.ingest(&buffer).await {
            warn!("Failed to persist {} live trades at shutdown: {}", buffer.len(), e);
        }

        let reason = outcome?;
        let flushed = match mode {
            ExecuteMode::RealRun if self.config.cancel_real_orders_on_exit => {
                driver.session.cancel_venue_orders().await?
            }
            ExecuteMode::RealRun => {
                let open = driver.session.open_orders(None).len();
                if open > 0 {
                    info!("Leaving {} orders open on the venue", open);
                }
                Vec::new()
            }
            _ => driver.session.flush_local(),
        };
        Ok(driver.finish(reason, flushed))
    }

    /// Download recent history and build the session.
    async fn prepare(
        &self,
        mode: ExecuteMode,
        market: &Arc<Market>,
        gateway: Option<Arc<dyn OrderGateway>>,
    ) -> Result<Session, EngineError> {
        match market.download(self.config.prepare_days, false).await {
            Ok(report) if !report.is_complete() => {
                warn!("Starting with partial history: {} downloads failed", report.failures.len())
            }
            Ok(_) => {}
            Err(e) if e.is_recoverable() => warn!("Starting without history: {}", e),
            Err(e) => return Err(e),
        }
        if let Err(e) = market.check_coverage().await {
            warn!("History is incomplete: {}", e);
        }

        match (mode, gateway) {
            (ExecuteMode::RealRun, Some(gateway)) => {
                let mut session = Session::venue("real", market.clone(), gateway, self.config.clock_interval_sec);
                session.load_venue_state().await?;
                Ok(session)
            }
            (ExecuteMode::RealRun, None) => Err(EngineError::InvalidArgument(
                "a real run needs an order gateway".to_string(),
            )),
            _ => Ok(Session::local(
                mode,
                "dry",
                market.clone(),
                self.initial_account(),
                self.config.clock_interval_sec,
            )),
        }
    }

    async fn live_loop(
        &self,
        driver: &mut Driver<'_>,
        rx: &mut mpsc::Receiver<RunEvent>,
        market: &Arc<Market>,
        buffer: &mut Vec<Trade>,
    ) -> Result<TerminationReason, EngineError> {
        let deadline = self
            .config
            .execute_limit_sec()
            .map(|limit| tokio::time::Instant::now() + Duration::from_secs(limit as u64));
        let mut disconnected: HashSet<String> = HashSet::new();

        loop {
            let expiry = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(TerminationReason::Cancelled),
                _ = expiry => return Ok(TerminationReason::ExecuteTime),
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => return Ok(TerminationReason::EndOfData),
                },
            };

            match event {
                RunEvent::Message(StreamMessage::Trade(trade)) => {
                    buffer.push(trade.clone());
                    if buffer.len() >= INGEST_BATCH {
                        market.ingest(buffer).await?;
                        buffer.clear();
                    }
                    if disconnected.is_empty() {
                        driver.step(&trade).await?;
                    }
                }
                RunEvent::Message(StreamMessage::Board(board)) => driver.session.on_board(&board),
                RunEvent::Message(StreamMessage::Order(order)) => {
                    if driver.session.mode() != ExecuteMode::RealRun {
                        debug!("Ignoring venue order report in {}", driver.session.mode());
                        continue;
                    }
                    match driver.session.apply_order_update(order) {
                        Ok(order) if driver.initialized => driver.deliver_updates(vec![order], false).await?,
                        Ok(_) => {}
                        Err(e @ EngineError::OrderAlreadyTerminal { .. }) => {
                            warn!("Ignoring late order report: {}", e)
                        }
                        Err(e) => driver.check("order report", Err(e))?,
                    }
                }
                RunEvent::Message(StreamMessage::Account(coins)) => {
                    if driver.session.mode() != ExecuteMode::RealRun {
                        continue;
                    }
                    driver.session.apply_account_update(&coins)?;
                    if driver.initialized {
                        driver.deliver_account().await?;
                    }
                }
                RunEvent::Disconnected { stream, error } => {
                    warn!("Pausing delivery: {}", error);
                    disconnected.insert(stream);
                }
                RunEvent::Reconnected { stream } => {
                    disconnected.remove(&stream);
                    if disconnected.is_empty() {
                        info!("All streams up again, closing the gap");
                        market.ingest(buffer).await?;
                        buffer.clear();
                        match market.fill_gap().await {
                            Ok(range) => debug!("Gap closed: {}", range),
                            Err(e) if e.is_recoverable() => warn!("Gap-fill failed: {}", e),
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }
    }
}

async fn shutdown_streams(stop: &CancellationToken, handles: Vec<JoinHandle<()>>) {
    stop.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Stream task ended abnormally: {}", e);
        }
    }
}
