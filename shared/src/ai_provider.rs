//! Chat-completion providers and the ordered fallback chain in front of them.
//!
//! DeepSeek and OpenAI speak the same wire protocol, so a single
//! [`OpenAiCompatibleProvider`] serves both; the [`ProviderChain`] tries them
//! in priority order and turns every failure into a value instead of an
//! error.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::dto::Language;
use crate::provider_settings::ProviderConfig;
use crate::stream_parser::{SseParser, StreamEvent};

#[derive(thiserror::Error, Debug, Clone)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("provider returned no content")]
    EmptyCompletion,
    #[error("no AI provider configured")]
    NoProvider,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, ProviderError>>;

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub tokens: Option<u32>,
}

/// One chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: Vec<ChatCompletionMessage>,
    ) -> Result<Completion, ProviderError>;

    /// Open a streaming completion. Providers that cannot stream keep the
    /// default, which makes the chain move on to the next one.
    async fn stream(
        &self,
        _messages: Vec<ChatCompletionMessage>,
    ) -> Result<EventStream, ProviderError> {
        Err(ProviderError::InvalidRequest(format!(
            "{} does not support streaming",
            self.name()
        )))
    }
}

pub fn msg(role: ChatCompletionMessageRole, txt: &str) -> ChatCompletionMessage {
    ChatCompletionMessage {
        role,
        content: Some(txt.to_string()),
        ..Default::default()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatCompletionMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// Provider for any endpoint implementing the OpenAI chat-completions API.
pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    async fn send(
        &self,
        messages: &[ChatCompletionMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let req = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        };
        let url = self.config.endpoint();
        debug!(provider = %self.config.key, model = req.model, stream, "\u{2192} chat request");

        let res = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                error!(provider = %self.config.key, "network error: {e}");
                ProviderError::Network(e.to_string())
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            debug!(
                provider = %self.config.key,
                %status,
                "\u{2190} body = {}",
                crate::utils::truncate_for_log(&body, 1024)
            );
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: crate::utils::truncate_for_log(&body, 256).to_string(),
            });
        }
        Ok(res)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.key
    }

    async fn complete(
        &self,
        messages: Vec<ChatCompletionMessage>,
    ) -> Result<Completion, ProviderError> {
        let res = self.send(&messages, false).await?;
        let bytes = res
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let chat: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyCompletion)?;

        Ok(Completion {
            content,
            model: chat.model.unwrap_or_else(|| self.config.model.clone()),
            tokens: chat.usage.and_then(|u| u.total_tokens),
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatCompletionMessage>,
    ) -> Result<EventStream, ProviderError> {
        let res = self.send(&messages, true).await?;
        let body = res.bytes_stream().boxed();
        // flush the parser when the body ends
        let events = stream::unfold(Some((body, SseParser::new())), |state| async move {
            let Some((mut body, mut parser)) = state else {
                return None;
            };
            match body.next().await {
                Some(Ok(bytes)) => {
                    let events = parser.feed(&bytes);
                    Some((Ok(events), Some((body, parser))))
                }
                Some(Err(e)) => Some((Err(ProviderError::Network(e.to_string())), None)),
                None => Some((Ok(parser.finish()), None)),
            }
        })
        .flat_map(|batch| match batch {
            Ok(events) => stream::iter(events.into_iter().map(Ok).collect::<Vec<_>>()),
            Err(e) => stream::iter(vec![Err(e)]),
        });
        Ok(events.boxed())
    }
}

/// Project metadata embedded into the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectContext {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Template metadata embedded into the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateContext {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub project: Option<ProjectContext>,
    #[serde(default)]
    pub template: Option<TemplateContext>,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
}

impl GenerationResult {
    fn success(c: Completion) -> Self {
        Self {
            content: c.content,
            status: GenerationStatus::Success,
            error: None,
            model: Some(c.model),
            tokens: c.tokens,
        }
    }

    fn failure(e: &ProviderError) -> Self {
        Self {
            content: String::new(),
            status: GenerationStatus::Error,
            error: Some(e.to_string()),
            model: None,
            tokens: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == GenerationStatus::Success
    }

    /// Content on success, the captured error message otherwise.
    pub fn into_result(self) -> Result<String, String> {
        match self.status {
            GenerationStatus::Success => Ok(self.content),
            GenerationStatus::Error => Err(self
                .error
                .unwrap_or_else(|| "generation failed".to_string())),
        }
    }
}

pub fn build_system_prompt(req: &GenerationRequest) -> String {
    let mut prompt = String::from(
        "You are ProductMind AI, an experienced product manager who writes clear, \
         well-structured product documents in Markdown.",
    );
    if let Some(project) = &req.project {
        prompt.push_str(&format!("\n\nProject: {}", project.name));
        if !project.description.is_empty() {
            prompt.push_str(&format!("\nProject description: {}", project.description));
        }
    }
    if let Some(template) = &req.template {
        prompt.push_str(&format!("\n\nDocument type: {}", template.name));
        if !template.description.is_empty() {
            prompt.push_str(&format!("\nDocument purpose: {}", template.description));
        }
    }
    prompt.push_str("\n\n");
    prompt.push_str(req.language.instruction());
    prompt
}

fn translation_prompt(to: Language) -> String {
    let target = match to {
        Language::En => "English",
        Language::Zh => "Simplified Chinese",
    };
    format!(
        "You are a professional translator. Translate the user's Markdown document into {target}. \
         Keep the Markdown structure, code blocks and mermaid diagrams unchanged. \
         Return only the translated document."
    )
}

/// Providers tried in sequence until one succeeds.
pub struct ProviderChain {
    providers: Vec<Arc<dyn ChatProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self { providers }
    }

    /// Chain of every provider that has credentials in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ProviderError> {
        let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::new();
        for cfg in ProviderConfig::from_settings(settings) {
            info!(provider = %cfg.key, model = %cfg.model, "AI provider configured");
            providers.push(Arc::new(OpenAiCompatibleProvider::new(cfg)?));
        }
        if providers.is_empty() {
            warn!("no AI provider key configured; generation requests will fail");
        }
        Ok(Self::new(providers))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run `messages` against each provider in order, returning the first
    /// success or the last failure.
    pub async fn complete(
        &self,
        messages: Vec<ChatCompletionMessage>,
    ) -> Result<Completion, ProviderError> {
        let mut last_err = ProviderError::NoProvider;
        for provider in &self.providers {
            match provider.complete(messages.clone()).await {
                Ok(c) => return Ok(c),
                Err(e) => {
                    warn!(provider = provider.name(), %e, "provider failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Generate a document. Never fails: errors are reported through
    /// [`GenerationResult::status`].
    pub async fn generate_content(&self, req: &GenerationRequest) -> GenerationResult {
        if req.prompt.trim().is_empty() {
            return GenerationResult::failure(&ProviderError::InvalidRequest(
                "prompt must not be empty".into(),
            ));
        }
        let messages = vec![
            msg(ChatCompletionMessageRole::System, &build_system_prompt(req)),
            msg(ChatCompletionMessageRole::User, &req.prompt),
        ];
        match self.complete(messages).await {
            Ok(c) => GenerationResult::success(c),
            Err(e) => {
                error!(%e, "content generation failed on every provider");
                GenerationResult::failure(&e)
            }
        }
    }

    /// Translate a finished document into `to`.
    pub async fn translate(&self, text: &str, to: Language) -> GenerationResult {
        if text.trim().is_empty() {
            return GenerationResult::failure(&ProviderError::InvalidRequest(
                "nothing to translate".into(),
            ));
        }
        let messages = vec![
            msg(ChatCompletionMessageRole::System, &translation_prompt(to)),
            msg(ChatCompletionMessageRole::User, text),
        ];
        match self.complete(messages).await {
            Ok(c) => GenerationResult::success(c),
            Err(e) => {
                error!(%e, target = %to, "translation failed on every provider");
                GenerationResult::failure(&e)
            }
        }
    }

    /// Open a streaming generation on the first provider that accepts it.
    pub async fn stream_content(&self, req: &GenerationRequest) -> Result<EventStream, ProviderError> {
        if req.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("prompt must not be empty".into()));
        }
        let messages = vec![
            msg(ChatCompletionMessageRole::System, &build_system_prompt(req)),
            msg(ChatCompletionMessageRole::User, &req.prompt),
        ];
        let mut last_err = ProviderError::NoProvider;
        for provider in &self.providers {
            match provider.stream(messages.clone()).await {
                Ok(s) => return Ok(s),
                Err(e) => {
                    warn!(provider = provider.name(), %e, "stream open failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(language: Language) -> GenerationRequest {
        GenerationRequest {
            prompt: "Write a PRD".into(),
            project: Some(ProjectContext {
                name: "Acme Notes".into(),
                description: "Note taking for teams".into(),
            }),
            template: Some(TemplateContext {
                name: "PRD".into(),
                description: String::new(),
            }),
            language,
        }
    }

    #[test]
    fn system_prompt_embeds_context_and_language() {
        let prompt = build_system_prompt(&request(Language::Zh));
        assert!(prompt.contains("Project: Acme Notes"));
        assert!(prompt.contains("Project description: Note taking for teams"));
        assert!(prompt.contains("Document type: PRD"));
        assert!(!prompt.contains("Document purpose"));
        assert!(prompt.ends_with(Language::Zh.instruction()));
    }

    #[tokio::test]
    async fn empty_chain_reports_error() {
        let chain = ProviderChain::new(Vec::new());
        let result = chain.generate_content(&request(Language::En)).await;
        assert_eq!(result.status, GenerationStatus::Error);
        assert_eq!(result.error.as_deref(), Some("no AI provider configured"));
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_without_calls() {
        let chain = ProviderChain::new(Vec::new());
        let mut req = request(Language::En);
        req.prompt = "   ".into();
        let result = chain.generate_content(&req).await;
        assert!(result.error.unwrap().contains("prompt must not be empty"));
    }

    #[test]
    fn result_serializes_lowercase_status() {
        let r = GenerationResult::failure(&ProviderError::EmptyCompletion);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("model").is_none());
    }
}
