//! One batch-production run: generate every missing (project, template)
//! version, then exit.

use std::sync::Arc;
use std::time::Duration;

use shared::ai_provider::ProviderChain;
use shared::config::Settings;
use shared::db::{self, PgStore};
use shared::dto::{BatchOptions, Language};
use shared::orchestrator::{FixedDelay, Orchestrator};
use shared::utils::env_parse;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn options_from_env(settings: &Settings) -> BatchOptions {
    let language = std::env::var("BATCH_LANGUAGE")
        .ok()
        .and_then(|v| v.trim().parse::<Language>().ok())
        .unwrap_or_default();
    BatchOptions {
        template_limit: env_parse("BATCH_TEMPLATE_LIMIT", 50),
        project_limit: env_parse("BATCH_PROJECT_LIMIT", 50),
        batch_size: Some(settings.batch_size),
        skip_existing: env_parse("BATCH_SKIP_EXISTING", true),
        dry_run: env_parse("BATCH_DRY_RUN", false),
        language,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let settings = Settings::new()?;
    let options = options_from_env(&settings);
    let pool = db::connect(&settings.database_url).await?;
    db::ensure_schema(&pool).await?;

    let ai = ProviderChain::from_settings(&settings)?;
    if ai.is_empty() && !options.dry_run {
        anyhow::bail!("set DEEPSEEK_API_KEY or OPENAI_API_KEY before generating");
    }

    let orchestrator = Orchestrator::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(ai),
        Arc::new(FixedDelay(Duration::from_millis(settings.batch_delay_ms))),
        settings.system_user_id,
        settings.batch_size,
    );

    info!(?options, "starting batch production");
    let report = orchestrator.run(&options).await?;
    if report.failed > 0 {
        warn!(failed = report.failed, "batch finished with failures");
    }
    info!(report = %serde_json::to_string(&report)?, "batch report");
    Ok(())
}
