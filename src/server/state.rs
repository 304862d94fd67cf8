use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<AppConfig>,
}
