pub mod http_client;
pub mod metrics;

pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use metrics::{MetricsSink, NoopMetricsSink};
