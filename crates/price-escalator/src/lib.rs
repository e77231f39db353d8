//! Price-escalation service: wires the index store, the remote MCP client and
//! the resolver from configuration, and exposes the month lookup, escalation
//! and batch refresh use cases used by the CLI.

pub mod config;
pub mod refresh;
pub mod service;
pub mod telemetry;

pub use config::ServiceConfig;
pub use refresh::{BatchRefresher, RefreshPolicy, RefreshReport, RefreshStatus};
pub use service::{CalculationReport, IndexService, MonthIndices, ServiceError};
