use std::sync::Arc;
use std::time::Duration;

use shared::ai_provider::ProviderChain;
use shared::config::Settings;
use shared::orchestrator::{FixedDelay, Orchestrator};
use shared::renderer::PageGenerator;
use shared::search::SerperClient;
use shared::store::TemplateStore;

use crate::queue::JobRegistry;

/// Everything a request handler needs, shared across actix workers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TemplateStore>,
    pub ai: Arc<ProviderChain>,
    pub orchestrator: Arc<Orchestrator>,
    pub pages: Arc<PageGenerator>,
    pub search: Option<Arc<SerperClient>>,
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn TemplateStore>,
        ai: Arc<ProviderChain>,
        search: Option<SerperClient>,
    ) -> Self {
        let pacer = Arc::new(FixedDelay(Duration::from_millis(settings.batch_delay_ms)));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            ai.clone(),
            pacer,
            settings.system_user_id,
            settings.batch_size,
        ));
        let pages = Arc::new(PageGenerator::new(
            &settings.static_pages_dir,
            settings.static_pages_base_url.clone(),
            store.clone(),
        ));
        Self {
            store,
            ai,
            orchestrator,
            pages,
            search: search.map(Arc::new),
            jobs: Arc::new(JobRegistry::new()),
        }
    }
}
