//! Cluster titles.
//!
//! A [`TitleProvider`] turns the tabs of one cluster into a short title,
//! usually by prompting an LLM. [`LabelGenerator`] wraps a provider in a
//! recovery boundary: timeouts, transport errors, malformed or empty replies
//! all become the configured fallback title, so a labeling problem can never
//! invalidate cluster membership.
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"ollama"` | [`OllamaTitles`] (`POST /api/generate`) |
//! | `"openai"` | [`OpenAITitles`] (chat completions) |
//! | `"domain"` | [`DomainTitles`] (offline hostname summary) |
//! | `"disabled"` | [`DisabledTitles`] (always the fallback) |

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LabelConfig, DEFAULT_OLLAMA_URL};
use crate::models::{ClusterKey, Tab, TitledGroup};
use crate::normalize::hostname;

/// Produces a title for the tabs of one cluster.
#[async_trait]
pub trait TitleProvider: Send + Sync {
    /// Provider identifier, matching the `labels.provider` config value.
    fn name(&self) -> &str;
    /// Generate a raw title. Errors are recovered by [`LabelGenerator`].
    async fn generate(&self, tabs: &[Tab]) -> Result<String>;
}

/// Prompt asking for a title of at most three words.
pub fn build_prompt(tabs: &[Tab]) -> String {
    let mut prompt = String::from("Generate a title for a group of browser tabs.\n\nTabs:\n");
    for tab in tabs {
        prompt.push_str(&format!("- {} ({})\n", tab.title, tab.url));
    }
    prompt.push_str(
        "\nOnly return the title. Make sure it is short and concise. \
         Not more than 3 words, best if 2 or 1 word.",
    );
    prompt
}

/// Strip whitespace and wrapping quotes from a completion.
///
/// Returns `None` when nothing is left.
pub fn clean_completion(raw: &str) -> Option<String> {
    let title = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim();
    (!title.is_empty()).then(|| title.to_string())
}

// ============ Ollama ============

/// Titles from a local Ollama model via `POST /api/generate`.
pub struct OllamaTitles {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaTitles {
    pub fn new(config: &LabelConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl TitleProvider for OllamaTitles {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, tabs: &[Tab]) -> Result<String> {
        let prompt = build_prompt(tabs);
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
        };

        let endpoint = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama request failed (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid Ollama response: {}", e))?;
        Ok(parsed.response)
    }
}

// ============ OpenAI ============

/// Titles from the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAITitles {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAITitles {
    pub fn new(config: &LabelConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl TitleProvider for OpenAITitles {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, tabs: &[Tab]) -> Result<String> {
        let prompt = build_prompt(tabs);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: 16,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("OpenAI request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid OpenAI response: {}", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No choices in OpenAI response"))
    }
}

// ============ Domain summary ============

/// Offline titles derived from the tabs' hostnames.
///
/// `"Group of <host>"` when every tab shares one hostname, otherwise
/// `"Mixed group (<n> tabs)"`.
pub struct DomainTitles;

#[async_trait]
impl TitleProvider for DomainTitles {
    fn name(&self) -> &str {
        "domain"
    }

    async fn generate(&self, tabs: &[Tab]) -> Result<String> {
        if tabs.is_empty() {
            bail!("cannot summarize an empty cluster");
        }
        Ok(domain_summary(tabs))
    }
}

pub fn domain_summary(tabs: &[Tab]) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for tab in tabs {
        let host = hostname(&tab.url).unwrap_or_default();
        *counts.entry(host).or_default() += 1;
    }

    match counts.into_iter().max_by_key(|(_, count)| *count) {
        Some((host, count)) if !host.is_empty() && count == tabs.len() => {
            format!("Group of {}", host)
        }
        _ => format!("Mixed group ({} tabs)", tabs.len()),
    }
}

// ============ Disabled ============

/// Always fails, so every cluster receives the fallback title.
pub struct DisabledTitles;

#[async_trait]
impl TitleProvider for DisabledTitles {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _tabs: &[Tab]) -> Result<String> {
        bail!("Title generation is disabled")
    }
}

pub fn create_title_provider(config: &LabelConfig) -> Result<Arc<dyn TitleProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledTitles)),
        "domain" => Ok(Arc::new(DomainTitles)),
        "ollama" => Ok(Arc::new(OllamaTitles::new(config)?)),
        "openai" => Ok(Arc::new(OpenAITitles::new(config)?)),
        other => bail!("Unknown label provider: {}", other),
    }
}

// ============ Recovery boundary ============

/// Best-effort cluster titling with a deterministic fallback.
pub struct LabelGenerator {
    provider: Arc<dyn TitleProvider>,
    fallback: String,
    timeout: Duration,
    max_retries: u32,
    max_concurrency: usize,
}

impl LabelGenerator {
    pub fn new(provider: Arc<dyn TitleProvider>, config: &LabelConfig) -> Self {
        Self {
            provider,
            fallback: config.fallback_title.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub fn from_config(config: &LabelConfig) -> Result<Self> {
        Ok(Self::new(create_title_provider(config)?, config))
    }

    pub fn fallback_title(&self) -> &str {
        &self.fallback
    }

    /// Title for one cluster. Never fails.
    pub async fn label(&self, tabs: &[Tab]) -> String {
        if self.provider.name() == "disabled" {
            tracing::debug!(
                tabs = tabs.len(),
                fallback = %self.fallback,
                "title generation disabled; using fallback"
            );
            return self.fallback.clone();
        }

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match tokio::time::timeout(self.timeout, self.provider.generate(tabs)).await {
                Ok(Ok(raw)) => match clean_completion(&raw) {
                    Some(title) => {
                        tracing::info!(tabs = tabs.len(), %title, "generated cluster title");
                        return title;
                    }
                    None => last_err = Some(anyhow::anyhow!("empty completion")),
                },
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => {
                    last_err = Some(anyhow::anyhow!("timed out after {:?}", self.timeout))
                }
            }
            tracing::debug!(attempt, provider = self.provider.name(), "title attempt failed");
        }

        if let Some(e) = last_err {
            tracing::warn!(
                provider = self.provider.name(),
                error = %format!("{:#}", e),
                fallback = %self.fallback,
                "title generation failed; using fallback"
            );
        }
        self.fallback.clone()
    }

    /// Title every cluster, at most `max_concurrency` requests in flight.
    ///
    /// Output follows ascending cluster-key order regardless of which
    /// request finishes first.
    pub async fn label_clusters(
        &self,
        clusters: BTreeMap<ClusterKey, Vec<Tab>>,
    ) -> Vec<TitledGroup> {
        stream::iter(clusters)
            .map(|(key, tabs)| async move {
                let title = self.label(&tabs).await;
                TitledGroup {
                    cluster_id: key.to_string(),
                    title,
                    tabs,
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTitles(&'static str);

    #[async_trait]
    impl TitleProvider for FixedTitles {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _tabs: &[Tab]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    /// Fails for clusters whose first tab id starts with "bad".
    struct PickyTitles;

    #[async_trait]
    impl TitleProvider for PickyTitles {
        fn name(&self) -> &str {
            "picky"
        }
        async fn generate(&self, tabs: &[Tab]) -> Result<String> {
            if tabs[0].id.starts_with("bad") {
                bail!("service unavailable");
            }
            Ok(format!("Title {}", tabs[0].id))
        }
    }

    /// Fails a fixed number of times before succeeding.
    struct FlakyTitles {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TitleProvider for FlakyTitles {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn generate(&self, _tabs: &[Tab]) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                bail!("transient");
            }
            Ok("Recovered".to_string())
        }
    }

    struct HangingTitles;

    #[async_trait]
    impl TitleProvider for HangingTitles {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn generate(&self, _tabs: &[Tab]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    /// Records the highest number of overlapping `generate` calls.
    #[derive(Default)]
    struct TrackingTitles {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TitleProvider for TrackingTitles {
        fn name(&self) -> &str {
            "tracking"
        }
        async fn generate(&self, tabs: &[Tab]) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("Title {}", tabs[0].id))
        }
    }

    fn tabs(ids: &[&str]) -> Vec<Tab> {
        ids.iter()
            .map(|id| Tab::new(*id, format!("https://example.com/{}", id), format!("Tab {}", id)))
            .collect()
    }

    fn generator(provider: Arc<dyn TitleProvider>) -> LabelGenerator {
        LabelGenerator::new(provider, &LabelConfig::default())
    }

    #[test]
    fn test_prompt_lists_titles_and_urls() {
        let prompt = build_prompt(&tabs(&["a", "b"]));
        assert!(prompt.contains("- Tab a (https://example.com/a)"));
        assert!(prompt.contains("- Tab b (https://example.com/b)"));
        assert!(prompt.contains("Not more than 3 words"));
    }

    #[test]
    fn test_clean_completion() {
        assert_eq!(clean_completion("  \"Rust Docs\"\n"), Some("Rust Docs".to_string()));
        assert_eq!(clean_completion("Cooking"), Some("Cooking".to_string()));
        assert_eq!(clean_completion(" '' "), None);
        assert_eq!(clean_completion("\n"), None);
    }

    #[test]
    fn test_domain_summary() {
        let same = vec![
            Tab::new("1", "https://GitHub.com/a", "A"),
            Tab::new("2", "https://github.com/b", "B"),
        ];
        assert_eq!(domain_summary(&same), "Group of github.com");

        let mixed = vec![
            Tab::new("1", "https://github.com/a", "A"),
            Tab::new("2", "https://gitlab.com/b", "B"),
            Tab::new("3", "https://github.com/c", "C"),
        ];
        assert_eq!(domain_summary(&mixed), "Mixed group (3 tabs)");

        let hostless = vec![Tab::new("1", "about:blank", "A"), Tab::new("2", "nope", "B")];
        assert_eq!(domain_summary(&hostless), "Mixed group (2 tabs)");

        let idn = vec![
            Tab::new("1", "https://bücher.de/a", "A"),
            Tab::new("2", "https://BÜCHER.de:8443/b", "B"),
        ];
        assert_eq!(domain_summary(&idn), "Group of bücher.de");
    }

    #[tokio::test]
    async fn test_label_uses_cleaned_completion() {
        let labeler = generator(Arc::new(FixedTitles("  'Rust Docs' ")));
        assert_eq!(labeler.label(&tabs(&["a"])).await, "Rust Docs");
    }

    #[tokio::test]
    async fn test_label_falls_back_on_error() {
        let labeler = generator(Arc::new(PickyTitles));
        assert_eq!(labeler.label(&tabs(&["bad"])).await, "New Group");
    }

    #[tokio::test]
    async fn test_label_falls_back_on_empty_completion() {
        let labeler = generator(Arc::new(FixedTitles("   ")));
        assert_eq!(labeler.label(&tabs(&["a"])).await, "New Group");
    }

    #[tokio::test]
    async fn test_disabled_provider_uses_custom_fallback() {
        let config = LabelConfig {
            fallback_title: "Untitled".to_string(),
            ..LabelConfig::default()
        };
        let labeler = LabelGenerator::new(Arc::new(DisabledTitles), &config);
        assert_eq!(labeler.label(&tabs(&["a"])).await, "Untitled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_label_times_out_to_fallback() {
        let config = LabelConfig {
            timeout_secs: 1,
            ..LabelConfig::default()
        };
        let labeler = LabelGenerator::new(Arc::new(HangingTitles), &config);
        assert_eq!(labeler.label(&tabs(&["a"])).await, "New Group");
    }

    #[tokio::test]
    async fn test_bounded_retry_recovers() {
        let provider = Arc::new(FlakyTitles {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let config = LabelConfig {
            max_retries: 1,
            ..LabelConfig::default()
        };
        let labeler = LabelGenerator::new(provider.clone(), &config);
        assert_eq!(labeler.label(&tabs(&["a"])).await, "Recovered");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let provider = Arc::new(FlakyTitles {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let labeler = generator(provider.clone());
        assert_eq!(labeler.label(&tabs(&["a"])).await, "New Group");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_label_clusters_keeps_order_and_membership() {
        let mut clusters = BTreeMap::new();
        clusters.insert(4, tabs(&["x1", "x2"]));
        clusters.insert(0, tabs(&["bad1", "bad2"]));
        clusters.insert(2, tabs(&["y1", "y2", "y3"]));

        let labeler = generator(Arc::new(PickyTitles));
        let groups = labeler.label_clusters(clusters).await;

        let summary: Vec<(&str, &str, usize)> = groups
            .iter()
            .map(|g| (g.cluster_id.as_str(), g.title.as_str(), g.tabs.len()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("0", "New Group", 2),
                ("2", "Title y1", 3),
                ("4", "Title x1", 2),
            ]
        );
        assert_eq!(groups[0].tabs, tabs(&["bad1", "bad2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_label_clusters_bounds_concurrency() {
        let mut clusters = BTreeMap::new();
        for key in 0..10 {
            let id = format!("c{}", key);
            clusters.insert(key, tabs(&[id.as_str()]));
        }

        let provider = Arc::new(TrackingTitles::default());
        let config = LabelConfig {
            max_concurrency: 3,
            ..LabelConfig::default()
        };
        let labeler = LabelGenerator::new(provider.clone(), &config);
        let groups = labeler.label_clusters(clusters).await;

        assert_eq!(groups.len(), 10);
        assert_eq!(groups[7].title, "Title c7");
        assert_eq!(provider.peak.load(Ordering::SeqCst), 3);
        assert_eq!(provider.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_label_clusters_single_slot_is_sequential() {
        let mut clusters = BTreeMap::new();
        clusters.insert(0, tabs(&["a"]));
        clusters.insert(1, tabs(&["b"]));
        clusters.insert(2, tabs(&["c"]));

        let provider = Arc::new(TrackingTitles::default());
        let config = LabelConfig {
            max_concurrency: 1,
            ..LabelConfig::default()
        };
        let labeler = LabelGenerator::new(provider.clone(), &config);
        labeler.label_clusters(clusters).await;

        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_title_provider() {
        let config = LabelConfig {
            provider: "domain".to_string(),
            ..LabelConfig::default()
        };
        assert_eq!(create_title_provider(&config).unwrap().name(), "domain");

        let config = LabelConfig {
            provider: "ollama".to_string(),
            ..LabelConfig::default()
        };
        assert_eq!(create_title_provider(&config).unwrap().name(), "ollama");

        let config = LabelConfig {
            provider: "gpt".to_string(),
            ..LabelConfig::default()
        };
        assert!(create_title_provider(&config).is_err());
    }
}
