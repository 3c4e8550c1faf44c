use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SuggestError;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate()?;
        Ok(config)
    }

    /// Same layering as `load`, from an in-memory TOML document.
    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        let config = Self { figment: Figment::new().merge(Toml::string(toml)) };
        config.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The `[suggest]` section; every key has a default.
    pub fn suggest(&self) -> anyhow::Result<SuggestConfig> {
        if self.figment.find_value("suggest").is_err() {
            return Ok(SuggestConfig::default());
        }
        self.get("suggest")
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.suggest()?.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestConfig {
    /// Name of the suggestion set; prefixes every index and alias it owns.
    pub id: String,
    pub pipeline: PipelineConfig,
    pub replication: ReplicationConfig,
    pub timeouts: TimeoutConfig,
    pub ranking: RankingConfig,
    /// Field families harvested from ingested documents.
    pub document: Vec<DocumentFields>,
    pub query_log: QueryLogFields,
    pub analysis: AnalysisConfig,
    pub storage: StorageConfig,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            id: "suggest".to_string(),
            pipeline: PipelineConfig::default(),
            replication: ReplicationConfig::default(),
            timeouts: TimeoutConfig::default(),
            ranking: RankingConfig::default(),
            document: vec![DocumentFields::default()],
            query_log: QueryLogFields::default(),
            analysis: AnalysisConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl SuggestConfig {
    pub fn validate(&self) -> Result<(), SuggestError> {
        if self.id.is_empty() || self.id.contains(|c: char| c.is_whitespace() || c == '.') {
            return Err(SuggestError::InvalidConfig(format!(
                "suggest.id must be non-empty without dots or spaces, got '{}'",
                self.id
            )));
        }
        if self.pipeline.max_queued_requests == 0 || self.pipeline.max_queued_terms == 0 {
            return Err(SuggestError::InvalidConfig("pipeline ceilings must be positive".into()));
        }
        if self.pipeline.bulk_size == 0 {
            return Err(SuggestError::InvalidConfig("pipeline.bulk_size must be positive".into()));
        }
        Ok(())
    }

    pub fn search_alias(&self) -> String {
        format!("{}.search", self.id)
    }

    pub fn update_alias(&self) -> String {
        format!("{}.update", self.id)
    }

    pub fn settings_index(&self) -> String {
        format!("{}.settings", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_queued_requests: usize,
    pub max_queued_terms: usize,
    pub bulk_size: usize,
    pub interval_ms: u64,
    pub backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queued_requests: 1000,
            max_queued_terms: 10_000,
            bulk_size: 500,
            interval_ms: 500,
            backoff_ms: 100,
        }
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub idle_wait_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { idle_wait_ms: 60_000 }
    }
}

impl ReplicationConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_ms: u64,
    pub index_ms: u64,
    pub admin_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { search_ms: 15_000, index_ms: 60_000, admin_ms: 60_000 }
    }
}

impl TimeoutConfig {
    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    pub fn index(&self) -> Duration {
        Duration::from_millis(self.index_ms)
    }

    pub fn admin(&self) -> Duration {
        Duration::from_millis(self.admin_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub prefix_match_weight: f64,
    pub match_word_first: bool,
    pub skip_duplicate_words: bool,
    pub popular_words_query_freq_threshold: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            prefix_match_weight: 2.0,
            match_word_first: true,
            skip_duplicate_words: true,
            popular_words_query_freq_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentFields {
    pub fields: Vec<String>,
    pub tag_fields: Vec<String>,
    pub role_field: Option<String>,
    pub lang_field: Option<String>,
}

impl Default for DocumentFields {
    fn default() -> Self {
        Self {
            fields: vec!["content".to_string()],
            tag_fields: vec!["label".to_string()],
            role_field: Some("role".to_string()),
            lang_field: Some("lang".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLogFields {
    pub fields: Vec<String>,
    pub tag_fields: Vec<String>,
    pub role_field: Option<String>,
}

impl Default for QueryLogFields {
    fn default() -> Self {
        Self {
            fields: vec!["content".to_string(), "title".to_string()],
            tag_fields: vec!["label".to_string()],
            role_field: Some("role".to_string()),
        }
    }
}

/// A strategy picked by registry tag, with free-form options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl StrategySpec {
    pub fn of(kind: &str) -> Self {
        Self { kind: kind.to_string(), ..Self::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub tokenizer: StrategySpec,
    /// Per-field tokenizer overrides.
    pub field_tokenizers: BTreeMap<String, StrategySpec>,
    pub normalizers: Vec<StrategySpec>,
    pub reading_converters: Vec<StrategySpec>,
    pub max_readings: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tokenizer: StrategySpec::of("script"),
            field_tokenizers: BTreeMap::new(),
            normalizers: vec![StrategySpec::of("nfkc"), StrategySpec::of("lowercase")],
            reading_converters: vec![StrategySpec::of("katakana"), StrategySpec::of("romaji")],
            max_readings: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for on-disk indices; in-memory when unset.
    pub path: Option<String>,
    pub writer_heap_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: None, writer_heap_bytes: 50_000_000 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
