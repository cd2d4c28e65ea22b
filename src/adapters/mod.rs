pub mod http_client;
pub mod http_handler;
pub mod metrics;

/// Re-export commonly used types from adapters
pub use http_client::SharedTransport;
pub use http_handler::{app, HttpHandler};
pub use metrics::{init_metrics, RecorderMetricsSink};
