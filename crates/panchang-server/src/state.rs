use panchang_chat::panchang::PanchangConfig;
use panchang_chat::providers::configs::ProviderConfig;
use std::time::Duration;

/// Shared application state.
///
/// Everything here is immutable configuration; the HTTP client is only shared
/// for its connection pool.
#[derive(Clone)]
pub struct AppState {
    pub provider_config: ProviderConfig,
    pub panchang_config: PanchangConfig,
    pub http_client: reqwest::Client,
    pub max_steps: usize,
    pub max_duration: Duration,
}
