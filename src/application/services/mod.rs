pub mod agent;
pub mod cancellation;
pub mod market;
pub mod registry;
pub mod runner;
pub mod session;
pub mod trade_store;

pub use agent::{Agent, AgentCapabilities};
pub use cancellation::CancellationToken;
pub use market::Market;
pub use registry::MarketRegistry;
pub use runner::{RunReport, Runner, TerminationReason};
pub use session::{ExecuteMode, Session};
