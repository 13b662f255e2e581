//! API layer
//!
//! HTTP handlers for:
//! - Server-rendered pages
//! - Dashboard data API
//! - Metrics (Prometheus)

mod dashboard;
pub mod metrics;
mod pages;

pub use dashboard::{DashboardResponse, dashboard_api_router};
pub use metrics::metrics_router;
pub use pages::{page_fallback, pages_router};
