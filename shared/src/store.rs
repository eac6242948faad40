//! Data access for templates, projects and generated versions.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::dto::{NewTemplateVersion, Project, Template, TemplateFilter, TemplateVersion};
use crate::error::Result;

/// `(project_id, template_id)`.
pub type PairKey = (Uuid, Uuid);

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<Template>>;

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>>;

    /// Projects that have both a name and a description, newest first.
    async fn user_projects(&self, limit: i64) -> Result<Vec<Project>>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>>;

    /// Pairs among the given candidates that already have at least one
    /// version.
    async fn existing_pairs(
        &self,
        project_ids: &[Uuid],
        template_ids: &[Uuid],
    ) -> Result<HashSet<PairKey>>;

    async fn insert_version(&self, version: NewTemplateVersion) -> Result<TemplateVersion>;

    async fn get_version(&self, id: Uuid) -> Result<Option<TemplateVersion>>;

    /// Versions of one pair, newest first.
    async fn versions_for(&self, template_id: Uuid, project_id: Uuid)
        -> Result<Vec<TemplateVersion>>;

    async fn next_version_number(&self, template_id: Uuid, project_id: Uuid) -> Result<i32>;

    /// Marks `version_id` active and every other version of its pair inactive.
    async fn set_active_version(&self, version_id: Uuid) -> Result<()>;

    async fn versions_missing_html(&self, limit: i64) -> Result<Vec<TemplateVersion>>;

    async fn set_html_paths(
        &self,
        version_id: Uuid,
        cn_html_path: Option<&str>,
        en_html_path: Option<&str>,
    ) -> Result<()>;

    /// Templates in visible categories, in display order.
    async fn available_templates(&self, limit: i64) -> Result<Vec<Template>> {
        self.list_templates(&TemplateFilter {
            category_id: None,
            limit: Some(limit),
            offset: None,
            visible_only: true,
        })
        .await
    }

    async fn latest_version(
        &self,
        template_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<TemplateVersion>> {
        Ok(self
            .versions_for(template_id, project_id)
            .await?
            .into_iter()
            .next())
    }
}
