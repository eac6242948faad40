//! Company / product lookup through the Serper web search API.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::ai_provider::ProviderError;
use crate::config::Settings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperItem>,
}

#[derive(Deserialize)]
struct SerperItem {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: u32,
}

pub struct SerperClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl SerperClient {
    pub fn new(api_key: &str, api_base: &str) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// `None` when no `SERPER_API_KEY` is configured.
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>, ProviderError> {
        if settings.serper_api_key.trim().is_empty() {
            return Ok(None);
        }
        Self::new(settings.serper_api_key.trim(), &settings.serper_api_base).map(Some)
    }

    pub async fn search(&self, query: &str, num: u32) -> Result<Vec<SearchHit>, ProviderError> {
        let q = query.trim();
        if q.is_empty() {
            return Ok(vec![]);
        }
        let num = num.clamp(1, 20);
        debug!(query = q, num, "\u{2192} serper search");

        let resp = self
            .client
            .post(format!("{}/search", self.api_base))
            .header("X-API-KEY", &self.api_key)
            .json(&SerperRequest { q, num })
            .send()
            .await
            .map_err(|e| {
                error!("network error to Serper: {e}");
                ProviderError::Network(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: crate::utils::truncate_for_log(&body, 256).to_string(),
            });
        }

        let parsed: SerperResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed
            .organic
            .into_iter()
            .filter_map(|item| {
                Some(SearchHit {
                    title: item.title?,
                    link: item.link?,
                    snippet: item.snippet,
                })
            })
            .take(num as usize)
            .collect())
    }
}
