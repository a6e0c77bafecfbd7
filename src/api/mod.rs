pub mod polygon;
pub mod retry;

pub use polygon::{AggregateBar, FinancialFiling, PolygonClient};
pub use retry::{json_attempt, Attempt, RetryPolicy};
