//! Index Resolution Library
//!
//! This library provides:
//! - A tiered resolver for monthly economic index values (store → remote → estimate)
//! - A session-aware client for a remote MCP index-data service
//! - The price-escalation formula (PIM = Pc / P0) consuming resolved indices
//! - Process-wide metrics for cache and remote call outcomes
//!
//! # Resolution tiers
//!
//! ```text
//! resolve(index_type, period)
//!   ├─ exact store hit          → Cached / Remote   (no network)
//!   ├─ remote fetch (timed)     → Remote            (written through to the store)
//!   ├─ latest stored record     → EstimateFromStore (labelled with its period)
//!   └─ nothing stored           → NotFound
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use indexing::{escalate, IndexPair, IndexResolver, IndexType, MemoryStore, Period};
//!
//! let resolver = IndexResolver::builder(Arc::new(MemoryStore::new())).build();
//! let base = resolver.resolve(IndexType::Primary, Period::new(2022, 3)?).await?;
//! ```

pub mod calculator;
pub mod metrics;
pub mod period;
pub mod remote;
pub mod resolver;
pub mod store;
pub mod types;

pub use calculator::{escalate, format_pim, Breakdown, CalcError, EscalationResult, IndexPair};
pub use metrics::{Metrics, MetricsSnapshot};
pub use period::{base_period, current_period, most_recent_available, trailing_window, Period, PeriodError};
pub use remote::{IndexSource, McpClientConfig, McpIndexClient, RemoteError};
pub use resolver::{IndexResolver, RefreshOutcome, ResolveError, ResolverBuilder};
pub use store::{load_seed, IndexStore, JsonFileStore, MemoryStore, StoreError};
pub use types::{IndexRecord, IndexType, Origin, ResolvedIndex, REMOTE_SOURCE_LABEL, SEED_SOURCE_LABEL};
