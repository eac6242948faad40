use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use shared::ai_provider::ProviderChain;
use shared::config::Settings;
use shared::db::{self, PgStore};
use shared::search::SerperClient;
use shared::store::TemplateStore;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod api;
mod error;
mod queue;
mod state;

use state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let settings = Settings::new()?;
    let pool = db::connect(&settings.database_url).await?;
    db::ensure_schema(&pool).await?;
    let store: Arc<dyn TemplateStore> = Arc::new(PgStore::new(pool));

    let ai = Arc::new(ProviderChain::from_settings(&settings)?);
    let search = SerperClient::from_settings(&settings)?;
    let state = AppState::new(&settings, store, ai, search);

    info!(
        bind = %settings.http_bind,
        port = settings.http_port,
        providers = ?state.ai.provider_names(),
        search = state.search.is_some(),
        "starting template-api"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Cors::permissive())
            .configure(api::configure)
            .default_service(web::to(api::not_found))
    })
    .bind((settings.http_bind.as_str(), settings.http_port))?
    .run()
    .await?;
    Ok(())
}
