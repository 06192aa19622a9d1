pub mod actor;
pub mod metrics;

pub use actor::ActorId;
pub use metrics::http_metrics_middleware;
