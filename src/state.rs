//! Shared state handed to every handler.

use crate::{config::AppConfig, services::upload_coordinator::UploadCoordinator};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: UploadCoordinator,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(coordinator: UploadCoordinator, config: AppConfig) -> Self {
        Self {
            coordinator,
            config: Arc::new(config),
        }
    }
}
