//! Provider router: picks the transport named in the config.

use std::collections::BTreeMap;
use std::sync::Arc;
use stepwise_config::AppConfig;
use stepwise_core::provider::Provider;
use tracing::{debug, warn};

use crate::openai_compat::OpenAiCompatProvider;

/// Named transports plus the one used by default.
pub struct ProviderRouter {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider, replacing any with the same name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// The provider named by `default_provider`, if it could be built.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.get(&self.default_provider)
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

/// Build every provider the config can reach.
///
/// Each `[providers.<name>]` entry is registered with its own key and URL,
/// falling back to the top-level key and the well-known URL for `name`. The
/// default provider is added even when it has no section. A provider with
/// neither an `api_url` nor a well-known URL is skipped.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    let sections = config
        .providers
        .iter()
        .map(|(name, section)| (name.as_str(), Some(section)));
    let implicit_default = (!config.providers.contains_key(&config.default_provider))
        .then_some((config.default_provider.as_str(), None));

    for (name, section) in sections.chain(implicit_default) {
        let api_url = section.and_then(|s| s.api_url.clone());
        let Some(base_url) = api_url.or_else(|| well_known_url(name).map(str::to_string)) else {
            warn!(provider = name, "No api_url configured and no well-known URL; skipping");
            continue;
        };
        let api_key = section
            .and_then(|s| s.api_key.clone())
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        debug!(provider = name, base_url = %base_url, "Registering provider");
        router.register(
            name,
            Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)),
        );
    }

    router
}

/// Base URLs of OpenAI-compatible services that need no `api_url`.
fn well_known_url(provider_name: &str) -> Option<&'static str> {
    let url = match provider_name {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url)
}
