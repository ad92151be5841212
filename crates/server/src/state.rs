use shared::settings::RelaySettings;
use std::sync::Arc;

/// Shared by every request. Holds no per-relay state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RelaySettings>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(settings: RelaySettings) -> reqwest::Result<Self> {
        Ok(Self {
            settings: Arc::new(settings),
            http: providers::openai::build_http_client()?,
        })
    }
}
