//! Strategy interface driven by the runner
//!
//! Every callback has a no-op default. An agent states which callbacks it
//! actually handles through [`Agent::capabilities`]; the runner checks that
//! declaration once, before the run starts, and only schedules what was
//! declared.

use async_trait::async_trait;

use crate::domain::entities::account::Account;
use crate::domain::entities::order::Order;
use crate::domain::entities::trade::OrderSide;
use crate::domain::errors::EngineError;
use crate::domain::value_objects::time::MicroSec;

use super::session::Session;

/// Callbacks an agent handles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentCapabilities {
    pub on_init: bool,
    pub on_tick: bool,
    pub on_clock: bool,
    pub on_update: bool,
    pub on_account_update: bool,
}

impl AgentCapabilities {
    pub fn all() -> Self {
        Self {
            on_init: true,
            on_tick: true,
            on_clock: true,
            on_update: true,
            on_account_update: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.on_init {
            names.push("on_init");
        }
        if self.on_tick {
            names.push("on_tick");
        }
        if self.on_clock {
            names.push("on_clock");
        }
        if self.on_update {
            names.push("on_update");
        }
        if self.on_account_update {
            names.push("on_account_update");
        }
        names
    }
}

#[async_trait]
pub trait Agent: Send {
    fn name(&self) -> &str {
        "agent"
    }

    fn capabilities(&self) -> AgentCapabilities;

    async fn on_init(&mut self, _session: &mut Session) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_tick(
        &mut self,
        _session: &mut Session,
        _side: OrderSide,
        _price: f64,
        _size: f64,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// `clock` is the boundary that was crossed.
    async fn on_clock(&mut self, _session: &mut Session, _clock: MicroSec) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_update(&mut self, _session: &mut Session, _order: Order) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_account_update(&mut self, _session: &mut Session, _account: Account) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Reject agents that declare nothing to schedule.
pub fn check_agent(agent: &dyn Agent) -> Result<AgentCapabilities, EngineError> {
    let capabilities = agent.capabilities();
    if capabilities.is_empty() {
        return Err(EngineError::AgentRejected(format!(
            "{} declares no callbacks",
            agent.name()
        )));
    }
    Ok(capabilities)
}
