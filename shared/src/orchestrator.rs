//! Batch production of template versions.
//!
//! A run walks `fetch templates -> fetch projects -> compute missing pairs`
//! and then either stops (dry run) or generates the missing pairs in chunks
//! of `batch_size`, pausing between chunks so the AI provider is not
//! flooded. Failures are recorded per pair; the run itself always finishes
//! with a full report.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ai_provider::{GenerationRequest, ProjectContext, ProviderChain, TemplateContext};
use crate::dto::{
    BatchOptions, BatchReport, Language, NewTemplateVersion, Project, TaskOutcome, TaskStatus,
    Template, TemplateVersion,
};
use crate::error::{AppError, Result};
use crate::store::TemplateStore;

/// Called between two chunks of a batch.
#[async_trait]
pub trait Pacer: Send + Sync {
    /// `completed` is the number of tasks finished so far.
    async fn pause(&self, completed: usize);
}

/// Sleeps a fixed amount between chunks.
pub struct FixedDelay(pub Duration);

#[async_trait]
impl Pacer for FixedDelay {
    async fn pause(&self, _completed: usize) {
        tokio::time::sleep(self.0).await;
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub project: Project,
    pub template: Template,
}

impl Task {
    fn outcome(&self, status: TaskStatus) -> TaskOutcome {
        TaskOutcome {
            project_id: self.project.id,
            template_id: self.template.id,
            project_name: self.project.display_name(Language::En).to_string(),
            template_name: self.template.name(Language::En).to_string(),
            status,
            version_id: None,
            error: None,
        }
    }
}

/// Pairs to generate plus the pairs left out because they already exist.
#[derive(Debug, Default)]
pub struct TaskPlan {
    pub tasks: Vec<Task>,
    pub skipped: Vec<Task>,
}

#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("translation failed: {0}")]
    Translation(String),
    #[error(transparent)]
    Store(#[from] AppError),
}

/// Content of one document in both languages.
struct Bilingual {
    en: String,
    zh: String,
}

pub struct Orchestrator {
    store: Arc<dyn TemplateStore>,
    ai: Arc<ProviderChain>,
    pacer: Arc<dyn Pacer>,
    system_user_id: Uuid,
    default_batch_size: usize,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TemplateStore>,
        ai: Arc<ProviderChain>,
        pacer: Arc<dyn Pacer>,
        system_user_id: Uuid,
        default_batch_size: usize,
    ) -> Self {
        Self {
            store,
            ai,
            pacer,
            system_user_id,
            default_batch_size: default_batch_size.max(1),
        }
    }

    pub async fn get_available_templates(&self, limit: i64) -> Result<Vec<Template>> {
        let templates = self.store.available_templates(limit).await?;
        info!(count = templates.len(), limit, "loaded visible templates");
        Ok(templates)
    }

    pub async fn get_user_projects(&self, limit: i64) -> Result<Vec<Project>> {
        let projects = self.store.user_projects(limit).await?;
        info!(count = projects.len(), limit, "loaded user projects");
        Ok(projects)
    }

    /// Cartesian product of `projects` x `templates`, project-major. With
    /// `skip_existing`, pairs that already have a version go to
    /// [`TaskPlan::skipped`] instead.
    pub async fn generate_task_list(
        &self,
        projects: &[Project],
        templates: &[Template],
        skip_existing: bool,
    ) -> Result<TaskPlan> {
        let seen = if skip_existing {
            let project_ids: Vec<Uuid> = projects.iter().map(|p| p.id).collect();
            let template_ids: Vec<Uuid> = templates.iter().map(|t| t.id).collect();
            self.store
                .existing_pairs(&project_ids, &template_ids)
                .await?
        } else {
            Default::default()
        };

        let mut plan = TaskPlan::default();
        for project in projects {
            for template in templates {
                let task = Task {
                    project: project.clone(),
                    template: template.clone(),
                };
                if seen.contains(&(project.id, template.id)) {
                    plan.skipped.push(task);
                } else {
                    plan.tasks.push(task);
                }
            }
        }
        info!(
            pending = plan.tasks.len(),
            skipped = plan.skipped.len(),
            "task list built"
        );
        Ok(plan)
    }

    /// Run `tasks` in chunks of `batch_size`. Tasks of one chunk run
    /// concurrently; the next chunk starts after all of them finished and
    /// after one pause.
    pub async fn execute_batch_tasks(
        &self,
        tasks: Vec<Task>,
        batch_size: usize,
        language: Language,
        report: &mut BatchReport,
    ) {
        let batch_size = batch_size.max(1);
        let chunk_count = tasks.len().div_ceil(batch_size);
        let mut completed = 0usize;

        for (idx, chunk) in tasks.chunks(batch_size).enumerate() {
            if idx > 0 {
                self.pacer.pause(completed).await;
            }
            info!(chunk = idx + 1, of = chunk_count, size = chunk.len(), "running chunk");

            let outcomes = join_all(chunk.iter().map(|task| self.run_task(task, language))).await;
            completed += outcomes.len();
            for outcome in outcomes {
                report.record(outcome);
            }
        }
    }

    async fn run_task(&self, task: &Task, language: Language) -> TaskOutcome {
        match self
            .process_task(&task.project, &task.template, language)
            .await
        {
            Ok(version) => {
                let mut outcome = task.outcome(TaskStatus::Generated);
                outcome.version_id = Some(version.id);
                outcome
            }
            Err(e) => {
                warn!(
                    project_id = %task.project.id,
                    template_id = %task.template.id,
                    %e,
                    "task failed"
                );
                let mut outcome = task.outcome(TaskStatus::Failed);
                outcome.error = Some(e.to_string());
                outcome
            }
        }
    }

    async fn bilingual(
        &self,
        prompt: &str,
        project: &Project,
        template: &Template,
        language: Language,
    ) -> std::result::Result<Bilingual, TaskError> {
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            project: Some(ProjectContext {
                name: project.display_name(language).to_string(),
                description: project.display_description(language).to_string(),
            }),
            template: Some(TemplateContext {
                name: template.name(language).to_string(),
                description: template.description(language).unwrap_or_default().to_string(),
            }),
            language,
        };
        let primary = self
            .ai
            .generate_content(&request)
            .await
            .into_result()
            .map_err(TaskError::Generation)?;
        let translated = self
            .ai
            .translate(&primary, language.other())
            .await
            .into_result()
            .map_err(TaskError::Translation)?;

        Ok(match language {
            Language::En => Bilingual {
                en: primary,
                zh: translated,
            },
            Language::Zh => Bilingual {
                en: translated,
                zh: primary,
            },
        })
    }

    /// Generate and persist one version for `(project, template)`.
    pub async fn process_task(
        &self,
        project: &Project,
        template: &Template,
        language: Language,
    ) -> std::result::Result<TemplateVersion, TaskError> {
        let main = self
            .bilingual(&template.prompt_content, project, template, language)
            .await?;
        let mdc = match template.mdc_prompt() {
            Some(prompt) => Some(self.bilingual(prompt, project, template, language).await?),
            None => None,
        };
        let (mdc_en, mdc_zh) = mdc.map(|m| (m.en, m.zh)).unwrap_or_default();

        let version_number = self
            .store
            .next_version_number(template.id, project.id)
            .await?;
        let version = self
            .store
            .insert_version(NewTemplateVersion {
                template_id: template.id,
                project_id: project.id,
                created_by: self.system_user_id,
                input_content: json!({
                    "project_name": project.display_name(language),
                    "project_description": project.display_description(language),
                    "template_name": template.name(language),
                    "language": language,
                    "prompt": template.prompt_content,
                }),
                output_content_en: main.en,
                output_content_zh: main.zh,
                mdc_content_en: mdc_en,
                mdc_content_zh: mdc_zh,
                is_active: true,
                version_number,
            })
            .await?;
        if version_number > 1 {
            // one active version per pair
            self.store.set_active_version(version.id).await?;
        }
        info!(
            project_id = %project.id,
            template_id = %template.id,
            version_id = %version.id,
            version_number,
            "template version saved"
        );
        Ok(version)
    }

    /// One full batch-production run.
    pub async fn run(&self, options: &BatchOptions) -> Result<BatchReport> {
        let templates = self.get_available_templates(options.template_limit).await?;
        let projects = self.get_user_projects(options.project_limit).await?;
        let plan = self
            .generate_task_list(&projects, &templates, options.skip_existing)
            .await?;

        let mut report = BatchReport {
            total: plan.tasks.len() + plan.skipped.len(),
            dry_run: options.dry_run,
            ..Default::default()
        };
        for task in &plan.skipped {
            report.record(task.outcome(TaskStatus::Skipped));
        }

        if options.dry_run {
            for task in &plan.tasks {
                report.record(task.outcome(TaskStatus::Planned));
            }
            info!(total = report.total, planned = report.planned, "dry run finished");
            return Ok(report);
        }

        let batch_size = options.batch_size.unwrap_or(self.default_batch_size);
        self.execute_batch_tasks(plan.tasks, batch_size, options.language, &mut report)
            .await;

        info!(
            total = report.total,
            generated = report.generated,
            skipped = report.skipped,
            failed = report.failed,
            "batch production finished"
        );
        if report.failed > 0 {
            error!(failed = report.failed, "some pairs could not be generated");
        }
        Ok(report)
    }

    /// Interactive generation for one project: always creates a new version
    /// per template and makes it the active one.
    pub async fn generate_for_project(
        &self,
        project_id: Uuid,
        template_ids: &[Uuid],
        language: Language,
    ) -> Result<Vec<TaskOutcome>> {
        if template_ids.is_empty() {
            return Err(AppError::Invalid("template_ids must not be empty".into()));
        }
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project {project_id}")))?;

        let mut outcomes = Vec::with_capacity(template_ids.len());
        for template_id in template_ids {
            let Some(template) = self.store.get_template(*template_id).await? else {
                outcomes.push(TaskOutcome {
                    project_id,
                    template_id: *template_id,
                    project_name: project.display_name(language).to_string(),
                    template_name: String::new(),
                    status: TaskStatus::Failed,
                    version_id: None,
                    error: Some(format!("template {template_id} not found")),
                });
                continue;
            };
            let task = Task {
                project: project.clone(),
                template,
            };
            outcomes.push(self.run_task(&task, language).await);
        }
        Ok(outcomes)
    }
}
