//! Renders static pages for active template versions that have none yet.

use std::sync::Arc;

use shared::config::Settings;
use shared::db::{self, PgStore};
use shared::renderer::PageGenerator;
use shared::utils::env_parse;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let settings = Settings::new()?;
    let limit: i64 = env_parse("PAGE_LIMIT", 50);
    let pool = db::connect(&settings.database_url).await?;
    db::ensure_schema(&pool).await?;

    let generator = PageGenerator::new(
        &settings.static_pages_dir,
        settings.static_pages_base_url.clone(),
        Arc::new(PgStore::new(pool)),
    );
    info!(root = %generator.root().display(), limit, "publishing missing pages");

    let summary = generator.publish_missing(limit).await?;
    if summary.failed > 0 {
        warn!(failed = summary.failed, "some versions could not be published");
    }
    info!(
        processed = summary.processed,
        published = summary.published,
        failed = summary.failed,
        "page generation finished"
    );
    Ok(())
}
