mod retry_policy;
mod upstream_client;

pub use upstream_client::{endpoint_url, UpstreamClient};
