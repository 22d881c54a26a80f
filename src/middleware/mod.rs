pub mod auth;
pub mod body_limit;
pub mod compression;
pub mod logging;
pub mod metrics;
pub mod request_id;
pub mod resources;
pub mod rewrite;
pub mod tracing;

pub use auth::{create_auth_middleware, resolve_authenticator};
pub use body_limit::{create_body_limit_middleware, BodyLimitConfig};
pub use compression::create_compression_middleware;
pub use logging::create_logging_middleware;
pub use self::metrics::{create_metrics_middleware, init_metrics, metrics_handler, MetricLabels};
pub use request_id::request_id_middleware;
pub use resources::{create_resources_middleware, get_resources, Resources, ServedBy};
pub use rewrite::create_rewrite_middleware;
pub use self::tracing::{create_tracing_middleware, SpanAttributes};
