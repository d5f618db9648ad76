//! Attribution and metrics engine shared by every resource kind.

pub mod attribution;
pub mod environment;
pub mod metrics;
pub mod row;

pub use attribution::{AttributionResolver, AttributionResult, Strategy};
pub use environment::{classify, Environment};
pub use metrics::{MetricValue, WindowedAggregator, FAILURE_SENTINEL};
pub use row::{EngineSettings, ReportRow, RowBuilder, RowStatus};
