#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use serde_json::json;
use shared::ai_provider::{ChatProvider, Completion, ProviderChain, ProviderError};
use shared::dto::{Project, Template, TemplateCategory, TemplateVersion};
use shared::memory_store::MemoryStore;
use shared::orchestrator::{Orchestrator, Pacer};
use uuid::Uuid;

pub const SYSTEM_USER: Uuid = Uuid::from_u128(0x5157);

/// Provider answering `generated:<user prompt>` and `translated:<text>`.
pub struct FakeProvider {
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    /// Prompts containing this marker fail.
    pub fail_marker: Option<String>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            fail_marker: None,
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn text_of(messages: &[ChatCompletionMessage], role: ChatCompletionMessageRole) -> String {
    messages
        .iter()
        .find(|m| m.role == role)
        .and_then(|m| m.content.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ChatProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(
        &self,
        messages: Vec<ChatCompletionMessage>,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = text_of(&messages, ChatCompletionMessageRole::System);
        let user = text_of(&messages, ChatCompletionMessageRole::User);
        self.prompts.lock().unwrap().push(user.clone());

        if let Some(marker) = &self.fail_marker {
            if user.contains(marker.as_str()) {
                return Err(ProviderError::Http {
                    status: 503,
                    body: "overloaded".into(),
                });
            }
        }
        let content = if system.contains("professional translator") {
            format!("translated:{user}")
        } else {
            format!("generated:{user}")
        };
        Ok(Completion {
            content,
            model: "fake-model".into(),
            tokens: Some(10),
        })
    }
}

/// Records how many tasks had finished at every pause.
#[derive(Default)]
pub struct RecordingPacer {
    pub pauses: Mutex<Vec<usize>>,
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, completed: usize) {
        self.pauses.lock().unwrap().push(completed);
    }
}

pub fn category(id: u128, isshow: bool) -> TemplateCategory {
    TemplateCategory {
        id: Uuid::from_u128(id),
        name_zh: Some("分类".into()),
        name_en: Some("Category".into()),
        isshow,
        sort_order: 0,
    }
}

pub fn template(id: u128, category_id: u128, prompt: &str) -> Template {
    Template {
        id: Uuid::from_u128(id),
        category_id: Uuid::from_u128(category_id),
        name_zh: Some(format!("模板{id}")),
        name_en: Some(format!("Template {id}")),
        description_zh: None,
        description_en: Some("A document".into()),
        prompt_content: prompt.to_string(),
        mdcprompt: None,
        sort_order: id as i32,
    }
}

pub fn project(id: u128, name: &str) -> Project {
    Project {
        id: Uuid::from_u128(id),
        user_id: Some(Uuid::from_u128(0xabc)),
        name: Some(name.to_string()),
        description: Some(format!("{name} description")),
        name_en: None,
        description_en: None,
        primary_category: None,
    }
}

pub fn existing_version(project_id: Uuid, template_id: Uuid) -> TemplateVersion {
    TemplateVersion {
        id: Uuid::new_v4(),
        template_id,
        project_id,
        created_by: SYSTEM_USER,
        input_content: json!({}),
        output_content_en: "# Existing".into(),
        output_content_zh: "# 已有".into(),
        mdc_content_en: String::new(),
        mdc_content_zh: String::new(),
        is_active: true,
        version_number: 1,
        cn_html_path: None,
        en_html_path: None,
        created_at: Utc::now(),
    }
}

/// Store with one visible category, templates 1 and 2, projects 10 and 20.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_category(category(100, true)).await;
    store.add_template(template(1, 100, "Write a PRD")).await;
    store.add_template(template(2, 100, "Write an MRD")).await;
    store.add_project(project(10, "Alpha")).await;
    store.add_project(project(20, "Beta")).await;
    store
}

pub fn orchestrator(
    store: Arc<MemoryStore>,
    provider: Arc<FakeProvider>,
    pacer: Arc<RecordingPacer>,
) -> Orchestrator {
    let chain = ProviderChain::new(vec![provider as Arc<dyn ChatProvider>]);
    Orchestrator::new(store, Arc::new(chain), pacer, SYSTEM_USER, 3)
}
