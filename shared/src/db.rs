//! Postgres-backed [`TemplateStore`].

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dto::{NewTemplateVersion, Project, Template, TemplateFilter, TemplateVersion};
use crate::error::{AppError, Result};
use crate::store::{PairKey, TemplateStore};
use crate::utils::ensure_sslmode_disable;

const TEMPLATE_COLUMNS: &str = "t.id, t.category_id, t.name_zh, t.name_en, t.description_zh, \
     t.description_en, t.prompt_content, t.mdcprompt, t.sort_order";

const PROJECT_COLUMNS: &str =
    "id, user_id, name, description, name_en, description_en, primary_category";

/// Projects need a name and a description that are not just whitespace.
const ELIGIBLE_PROJECT: &str = "btrim(coalesce(name, '')) <> '' \
     AND btrim(coalesce(description, '')) <> ''";

const VERSION_COLUMNS: &str = "id, template_id, project_id, created_by, input_content, \
     output_content_en, output_content_zh, mdc_content_en, mdc_content_zh, is_active, \
     version_number, cn_html_path, en_html_path, created_at";

/// Connect to Postgres with the pool settings shared by all binaries.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let url = ensure_sslmode_disable(database_url);
    if url != database_url {
        warn!("DATABASE_URL had no sslmode; using sslmode=disable for local host");
    }
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&url)
        .await
        .map_err(|e| {
            error!(%e, "failed to connect to Postgres");
            AppError::from(e)
        })
}

/// Create the tables used by the backend if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS pgcrypto;")
        .execute(pool)
        .await
    {
        warn!(%e, "CREATE EXTENSION pgcrypto failed (continuing)");
    }

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS template_categories (
          id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
          name_zh     TEXT,
          name_en     TEXT,
          isshow      BOOLEAN NOT NULL DEFAULT TRUE,
          sort_order  INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS templates (
          id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
          category_id     UUID NOT NULL REFERENCES template_categories(id) ON DELETE CASCADE,
          name_zh         TEXT,
          name_en         TEXT,
          description_zh  TEXT,
          description_en  TEXT,
          prompt_content  TEXT NOT NULL,
          mdcprompt       TEXT,
          sort_order      INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_projects (
          id                UUID PRIMARY KEY DEFAULT gen_random_uuid(),
          user_id           UUID,
          name              TEXT,
          description       TEXT,
          name_en           TEXT,
          description_en    TEXT,
          primary_category  TEXT,
          created_at        TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS template_versions (
          id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
          template_id        UUID NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
          project_id         UUID NOT NULL REFERENCES user_projects(id) ON DELETE CASCADE,
          created_by         UUID NOT NULL,
          input_content      JSONB NOT NULL DEFAULT '{}'::jsonb,
          output_content_en  TEXT NOT NULL DEFAULT '',
          output_content_zh  TEXT NOT NULL DEFAULT '',
          mdc_content_en     TEXT NOT NULL DEFAULT '',
          mdc_content_zh     TEXT NOT NULL DEFAULT '',
          is_active          BOOLEAN NOT NULL DEFAULT TRUE,
          version_number     INTEGER NOT NULL DEFAULT 1,
          cn_html_path       TEXT,
          en_html_path       TEXT,
          created_at         TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        "CREATE INDEX IF NOT EXISTS template_versions_pair_idx \
           ON template_versions (project_id, template_id)",
    ];

    for stmt in statements {
        sqlx::query(stmt).execute(pool).await.map_err(|e| {
            error!(%e, "schema statement failed");
            AppError::from(e)
        })?;
    }
    info!("database schema ensured");
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<Template>> {
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS}
               FROM templates t
               JOIN template_categories c ON c.id = t.category_id
              WHERE ($1::bool = FALSE OR c.isshow = TRUE)
                AND ($2::uuid IS NULL OR t.category_id = $2)
              ORDER BY c.sort_order, t.sort_order, t.name_en
              LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, Template>(&sql)
            .bind(filter.visible_only)
            .bind(filter.category_id)
            .bind(filter.limit.unwrap_or(100))
            .bind(filter.offset.unwrap_or(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates t WHERE t.id = $1");
        Ok(sqlx::query_as::<_, Template>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn user_projects(&self, limit: i64) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS}
               FROM user_projects
              WHERE {ELIGIBLE_PROJECT}
              ORDER BY created_at DESC
              LIMIT $1"
        );
        Ok(sqlx::query_as::<_, Project>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM user_projects WHERE id = $1");
        Ok(sqlx::query_as::<_, Project>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn existing_pairs(
        &self,
        project_ids: &[Uuid],
        template_ids: &[Uuid],
    ) -> Result<HashSet<PairKey>> {
        if project_ids.is_empty() || template_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT DISTINCT project_id, template_id
               FROM template_versions
              WHERE project_id = ANY($1) AND template_id = ANY($2)",
        )
        .bind(project_ids.to_vec())
        .bind(template_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_version(&self, v: NewTemplateVersion) -> Result<TemplateVersion> {
        let sql = format!(
            "INSERT INTO template_versions
               (template_id, project_id, created_by, input_content, output_content_en,
                output_content_zh, mdc_content_en, mdc_content_zh, is_active, version_number)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
             RETURNING {VERSION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, TemplateVersion>(&sql)
            .bind(v.template_id)
            .bind(v.project_id)
            .bind(v.created_by)
            .bind(v.input_content)
            .bind(v.output_content_en)
            .bind(v.output_content_zh)
            .bind(v.mdc_content_en)
            .bind(v.mdc_content_zh)
            .bind(v.is_active)
            .bind(v.version_number)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn get_version(&self, id: Uuid) -> Result<Option<TemplateVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM template_versions WHERE id = $1");
        Ok(sqlx::query_as::<_, TemplateVersion>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn versions_for(
        &self,
        template_id: Uuid,
        project_id: Uuid,
    ) -> Result<Vec<TemplateVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS}
               FROM template_versions
              WHERE template_id = $1 AND project_id = $2
              ORDER BY version_number DESC, created_at DESC"
        );
        Ok(sqlx::query_as::<_, TemplateVersion>(&sql)
            .bind(template_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn next_version_number(&self, template_id: Uuid, project_id: Uuid) -> Result<i32> {
        let max: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(version_number) FROM template_versions
              WHERE template_id = $1 AND project_id = $2",
        )
        .bind(template_id)
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    async fn set_active_version(&self, version_id: Uuid) -> Result<()> {
        let res = sqlx::query(
            "UPDATE template_versions v
                SET is_active = (v.id = $1)
               FROM template_versions target
              WHERE target.id = $1
                AND v.template_id = target.template_id
                AND v.project_id = target.project_id",
        )
        .bind(version_id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("template version {version_id}")));
        }
        Ok(())
    }

    async fn versions_missing_html(&self, limit: i64) -> Result<Vec<TemplateVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS}
               FROM template_versions
              WHERE is_active = TRUE
                AND ((cn_html_path IS NULL AND output_content_zh <> '')
                  OR (en_html_path IS NULL AND output_content_en <> ''))
              ORDER BY created_at
              LIMIT $1"
        );
        Ok(sqlx::query_as::<_, TemplateVersion>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn set_html_paths(
        &self,
        version_id: Uuid,
        cn_html_path: Option<&str>,
        en_html_path: Option<&str>,
    ) -> Result<()> {
        let res = sqlx::query(
            "UPDATE template_versions
                SET cn_html_path = COALESCE($2, cn_html_path),
                    en_html_path = COALESCE($3, en_html_path)
              WHERE id = $1",
        )
        .bind(version_id)
        .bind(cn_html_path)
        .bind(en_html_path)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("template version {version_id}")));
        }
        Ok(())
    }
}
