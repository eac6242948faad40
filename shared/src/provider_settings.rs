//! Central registry for supported chat-completion providers.

use std::time::Duration;

use crate::config::Settings;

#[derive(Debug, Clone, Copy)]
/// Static description of a selectable provider.
pub struct ProviderOption {
    pub key: &'static str,
    pub model: &'static str,
    pub api_base: &'static str,
    /// Path appended to the base URL for chat completions.
    pub chat_path: &'static str,
}

/// All supported providers in fallback priority order.
pub const PROVIDER_OPTIONS: &[ProviderOption] = &[
    ProviderOption {
        key: "deepseek",
        model: "deepseek-chat",
        api_base: "https://api.deepseek.com",
        chat_path: "/chat/completions",
    },
    ProviderOption {
        key: "openai",
        model: "gpt-4o-mini",
        api_base: "https://api.openai.com",
        chat_path: "/v1/chat/completions",
    },
];

/// Provider tried first when several are configured.
pub const DEFAULT_PROVIDER: &str = PROVIDER_OPTIONS[0].key;

/// Returns true when the provided key matches a supported provider.
pub fn is_valid_provider(key: &str) -> bool {
    PROVIDER_OPTIONS.iter().any(|opt| opt.key == key)
}

/// Returns the [`ProviderOption`] for the given key or the default one.
pub fn option_for(key: &str) -> &'static ProviderOption {
    PROVIDER_OPTIONS
        .iter()
        .find(|opt| opt.key == key)
        .unwrap_or(&PROVIDER_OPTIONS[0])
}

/// Runtime configuration of one provider instance.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub key: String,
    pub api_key: String,
    pub api_base: String,
    pub chat_path: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Config for `key` using the registry defaults for everything but the
    /// credentials and base URL.
    pub fn for_option(key: &str, api_key: &str, api_base: &str) -> Self {
        let opt = option_for(key);
        Self {
            key: opt.key.to_string(),
            api_key: api_key.to_string(),
            api_base: api_base.to_string(),
            chat_path: opt.chat_path.to_string(),
            model: opt.model.to_string(),
            temperature: 0.7,
            max_tokens: 4_000,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), self.chat_path)
    }

    /// Configured providers in priority order. Providers without an API key
    /// are left out.
    pub fn from_settings(settings: &Settings) -> Vec<ProviderConfig> {
        let candidates = [
            (
                "deepseek",
                &settings.deepseek_api_key,
                &settings.deepseek_api_base,
                &settings.deepseek_model,
            ),
            (
                "openai",
                &settings.openai_api_key,
                &settings.openai_api_base,
                &settings.openai_model,
            ),
        ];
        candidates
            .into_iter()
            .filter(|(_, api_key, _, _)| !api_key.trim().is_empty())
            .map(|(key, api_key, api_base, model)| {
                let mut cfg = ProviderConfig::for_option(key, api_key, api_base);
                if !model.is_empty() {
                    cfg.model = model.clone();
                }
                cfg.temperature = settings.ai_temperature;
                cfg.max_tokens = settings.ai_max_tokens;
                cfg.timeout = Duration::from_secs(settings.ai_timeout_secs);
                cfg
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_falls_back_to_default() {
        assert!(is_valid_provider("openai"));
        assert!(!is_valid_provider("mistral"));
        assert_eq!(option_for("mistral").key, DEFAULT_PROVIDER);
    }

    #[test]
    fn settings_without_keys_yield_no_providers() {
        assert!(ProviderConfig::from_settings(&Settings::default()).is_empty());
    }

    #[test]
    fn providers_keep_priority_order() {
        let settings = Settings {
            deepseek_api_key: "ds".into(),
            openai_api_key: "oa".into(),
            ..Settings::default()
        };
        let providers = ProviderConfig::from_settings(&settings);
        let keys: Vec<&str> = providers.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["deepseek", "openai"]);
        assert_eq!(
            providers[1].endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let cfg = ProviderConfig::for_option("deepseek", "k", "http://localhost:9000/");
        assert_eq!(cfg.endpoint(), "http://localhost:9000/chat/completions");
    }
}
