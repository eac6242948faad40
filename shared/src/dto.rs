use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Locales content is generated and published in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    pub fn other(self) -> Language {
        match self {
            Language::En => Language::Zh,
            Language::Zh => Language::En,
        }
    }

    /// Instruction appended to system prompts to pin the answer language.
    pub fn instruction(self) -> &'static str {
        match self {
            Language::En => "Respond in English.",
            Language::Zh => "请使用中文回答。",
        }
    }

    /// Value for the `lang` attribute of rendered pages.
    pub fn html_lang(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh-CN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TemplateCategory {
    pub id: Uuid,
    pub name_zh: Option<String>,
    pub name_en: Option<String>,
    pub isshow: bool,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name_zh: Option<String>,
    pub name_en: Option<String>,
    pub description_zh: Option<String>,
    pub description_en: Option<String>,
    pub prompt_content: String,
    /// Secondary prompt producing the "mdc" companion document.
    pub mdcprompt: Option<String>,
    pub sort_order: i32,
}

impl Template {
    pub fn name(&self, lang: Language) -> &str {
        let (primary, fallback) = match lang {
            Language::En => (&self.name_en, &self.name_zh),
            Language::Zh => (&self.name_zh, &self.name_en),
        };
        primary
            .as_deref()
            .or(fallback.as_deref())
            .unwrap_or("Untitled template")
    }

    pub fn description(&self, lang: Language) -> Option<&str> {
        match lang {
            Language::En => self.description_en.as_deref().or(self.description_zh.as_deref()),
            Language::Zh => self.description_zh.as_deref().or(self.description_en.as_deref()),
        }
    }

    pub fn mdc_prompt(&self) -> Option<&str> {
        self.mdcprompt.as_deref().filter(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub name_en: Option<String>,
    pub description_en: Option<String>,
    pub primary_category: Option<String>,
}

impl Project {
    pub fn display_name(&self, lang: Language) -> &str {
        let localized = match lang {
            Language::En => self.name_en.as_deref(),
            Language::Zh => None,
        };
        localized
            .or(self.name.as_deref())
            .unwrap_or("Untitled project")
    }

    pub fn display_description(&self, lang: Language) -> &str {
        let localized = match lang {
            Language::En => self.description_en.as_deref(),
            Language::Zh => None,
        };
        localized.or(self.description.as_deref()).unwrap_or("")
    }
}

/// A generated document for one (template, project) pair.
///
/// Content lives in four columns: the main document and its "mdc"
/// companion, each in English and Chinese.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TemplateVersion {
    pub id: Uuid,
    pub template_id: Uuid,
    pub project_id: Uuid,
    pub created_by: Uuid,
    pub input_content: serde_json::Value,
    pub output_content_en: String,
    pub output_content_zh: String,
    pub mdc_content_en: String,
    pub mdc_content_zh: String,
    pub is_active: bool,
    pub version_number: i32,
    pub cn_html_path: Option<String>,
    pub en_html_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TemplateVersion {
    pub fn content_for(&self, lang: Language) -> &str {
        match lang {
            Language::En => &self.output_content_en,
            Language::Zh => &self.output_content_zh,
        }
    }

    pub fn mdc_content_for(&self, lang: Language) -> &str {
        match lang {
            Language::En => &self.mdc_content_en,
            Language::Zh => &self.mdc_content_zh,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplateVersion {
    pub template_id: Uuid,
    pub project_id: Uuid,
    pub created_by: Uuid,
    pub input_content: serde_json::Value,
    pub output_content_en: String,
    pub output_content_zh: String,
    pub mdc_content_en: String,
    pub mdc_content_zh: String,
    pub is_active: bool,
    pub version_number: i32,
}

#[derive(Debug, Clone)]
pub struct TemplateFilter {
    pub category_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Only templates whose category has `isshow` set.
    pub visible_only: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Planned,
    Generated,
    Skipped,
    Failed,
}

/// Outcome of a single (project, template) pair in a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub project_id: Uuid,
    pub template_id: Uuid,
    pub project_name: String,
    pub template_name: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate returned by a batch-production run. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Pairs that would be generated; only non-zero for dry runs.
    pub planned: usize,
    pub dry_run: bool,
    pub details: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn record(&mut self, outcome: TaskOutcome) {
        match outcome.status {
            TaskStatus::Planned => self.planned += 1,
            TaskStatus::Generated => self.generated += 1,
            TaskStatus::Skipped => self.skipped += 1,
            TaskStatus::Failed => self.failed += 1,
        }
        self.details.push(outcome);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchOptions {
    #[serde(default = "default_limit")]
    pub template_limit: i64,
    #[serde(default = "default_limit")]
    pub project_limit: i64,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// Language generated first; the other one is produced by translation.
    #[serde(default)]
    pub language: Language,
}

fn default_limit() -> i64 {
    50
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            template_limit: default_limit(),
            project_limit: default_limit(),
            batch_size: None,
            skip_existing: true,
            dry_run: false,
            language: Language::En,
        }
    }
}
