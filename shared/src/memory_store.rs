//! In-process [`TemplateStore`] for local dry runs and tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dto::{
    NewTemplateVersion, Project, Template, TemplateCategory, TemplateFilter, TemplateVersion,
};
use crate::error::{AppError, Result};
use crate::store::{PairKey, TemplateStore};

#[derive(Default)]
struct Inner {
    categories: Vec<TemplateCategory>,
    templates: Vec<Template>,
    /// Insertion order doubles as creation order.
    projects: Vec<Project>,
    versions: Vec<TemplateVersion>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    writes: AtomicUsize,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_category(&self, category: TemplateCategory) {
        self.inner.write().await.categories.push(category);
    }

    pub async fn add_template(&self, template: Template) {
        self.inner.write().await.templates.push(template);
    }

    pub async fn add_project(&self, project: Project) {
        self.inner.write().await.projects.push(project);
    }

    /// Seed an existing version without counting it as a write.
    pub async fn seed_version(&self, version: TemplateVersion) {
        self.inner.write().await.versions.push(version);
    }

    /// Number of mutating calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every mutating call fail with a database error.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn begin_write(&self) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("writes rejected".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<Template>> {
        let inner = self.inner.read().await;
        let category = |id: Uuid| inner.categories.iter().find(|c| c.id == id);
        let mut rows: Vec<&Template> = inner
            .templates
            .iter()
            .filter(|t| {
                let Some(c) = category(t.category_id) else {
                    return false;
                };
                (!filter.visible_only || c.isshow)
                    && filter.category_id.map_or(true, |id| id == t.category_id)
            })
            .collect();
        rows.sort_by_key(|t| {
            (
                category(t.category_id).map(|c| c.sort_order).unwrap_or_default(),
                t.sort_order,
            )
        });
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(100).max(0) as usize;
        Ok(rows.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>> {
        let inner = self.inner.read().await;
        Ok(inner.templates.iter().find(|t| t.id == id).cloned())
    }

    async fn user_projects(&self, limit: i64) -> Result<Vec<Project>> {
        let inner = self.inner.read().await;
        Ok(inner
            .projects
            .iter()
            .rev()
            .filter(|p| has_text(&p.name) && has_text(&p.description))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let inner = self.inner.read().await;
        Ok(inner.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn existing_pairs(
        &self,
        project_ids: &[Uuid],
        template_ids: &[Uuid],
    ) -> Result<HashSet<PairKey>> {
        let inner = self.inner.read().await;
        Ok(inner
            .versions
            .iter()
            .filter(|v| project_ids.contains(&v.project_id) && template_ids.contains(&v.template_id))
            .map(|v| (v.project_id, v.template_id))
            .collect())
    }

    async fn insert_version(&self, v: NewTemplateVersion) -> Result<TemplateVersion> {
        self.begin_write()?;
        let row = TemplateVersion {
            id: Uuid::new_v4(),
            template_id: v.template_id,
            project_id: v.project_id,
            created_by: v.created_by,
            input_content: v.input_content,
            output_content_en: v.output_content_en,
            output_content_zh: v.output_content_zh,
            mdc_content_en: v.mdc_content_en,
            mdc_content_zh: v.mdc_content_zh,
            is_active: v.is_active,
            version_number: v.version_number,
            cn_html_path: None,
            en_html_path: None,
            created_at: Utc::now(),
        };
        self.inner.write().await.versions.push(row.clone());
        Ok(row)
    }

    async fn get_version(&self, id: Uuid) -> Result<Option<TemplateVersion>> {
        let inner = self.inner.read().await;
        Ok(inner.versions.iter().find(|v| v.id == id).cloned())
    }

    async fn versions_for(
        &self,
        template_id: Uuid,
        project_id: Uuid,
    ) -> Result<Vec<TemplateVersion>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<TemplateVersion> = inner
            .versions
            .iter()
            .filter(|v| v.template_id == template_id && v.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.version_number
                .cmp(&a.version_number)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(rows)
    }

    async fn next_version_number(&self, template_id: Uuid, project_id: Uuid) -> Result<i32> {
        let inner = self.inner.read().await;
        let max = inner
            .versions
            .iter()
            .filter(|v| v.template_id == template_id && v.project_id == project_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn set_active_version(&self, version_id: Uuid) -> Result<()> {
        self.begin_write()?;
        let mut inner = self.inner.write().await;
        let Some(target) = inner.versions.iter().find(|v| v.id == version_id) else {
            return Err(AppError::NotFound(format!("template version {version_id}")));
        };
        let pair = (target.template_id, target.project_id);
        for v in inner
            .versions
            .iter_mut()
            .filter(|v| (v.template_id, v.project_id) == pair)
        {
            v.is_active = v.id == version_id;
        }
        Ok(())
    }

    async fn versions_missing_html(&self, limit: i64) -> Result<Vec<TemplateVersion>> {
        let inner = self.inner.read().await;
        Ok(inner
            .versions
            .iter()
            .filter(|v| {
                v.is_active
                    && ((v.cn_html_path.is_none() && !v.output_content_zh.is_empty())
                        || (v.en_html_path.is_none() && !v.output_content_en.is_empty()))
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_html_paths(
        &self,
        version_id: Uuid,
        cn_html_path: Option<&str>,
        en_html_path: Option<&str>,
    ) -> Result<()> {
        self.begin_write()?;
        let mut inner = self.inner.write().await;
        let Some(v) = inner.versions.iter_mut().find(|v| v.id == version_id) else {
            return Err(AppError::NotFound(format!("template version {version_id}")));
        };
        if let Some(p) = cn_html_path {
            v.cn_html_path = Some(p.to_string());
        }
        if let Some(p) = en_html_path {
            v.en_html_path = Some(p.to_string());
        }
        Ok(())
    }
}
