//! Configuration parsing and validation.
//!
//! KB Harness is configured via a TOML file (default `./config/kbh.toml`).
//! Every key has a default, so the file is optional: with no file the tool
//! provisions the `demo-rag` knowledge base in `us-east-1`.
//!
//! # Example
//!
//! ```toml
//! [aws]
//! region = "us-east-1"
//!
//! [knowledge_base]
//! name = "demo-rag"
//! bucket_glob = "amazon-bedrock-knowledge-base*"
//!
//! [vector_store]
//! policy_name = "bedrock-security-policy"
//! principals = ["arn:aws:iam::123456789012:user/admin"]
//!
//! [polling]
//! interval_secs = 10
//! timeout_secs = 500
//!
//! [orchestration]
//! on_create_failure = "abort"
//! ```
//!
//! Derived names (collection, index, vector field, data source) are computed
//! from the knowledge base name and vector prefix unless set explicitly.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/kbh.toml";

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Endpoint overrides keyed by service (`aoss`, `bedrock-agent`, `s3`,
    /// ...), e.g. for LocalStack: `aoss = "http://localhost:4566"`.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoints: BTreeMap::new(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct KnowledgeBaseConfig {
    #[serde(default = "default_kb_name")]
    pub name: String,
    #[serde(default = "default_kb_description")]
    pub description: String,
    /// IAM role the knowledge base assumes. Resolved to an ARN at startup
    /// unless `role_arn` is set.
    #[serde(default = "default_role_name")]
    pub role_name: String,
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Source bucket. When unset, the first bucket matching `bucket_glob`.
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default = "default_bucket_glob")]
    pub bucket_glob: String,
    #[serde(default)]
    pub data_source_name: Option<String>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            name: default_kb_name(),
            description: default_kb_description(),
            role_name: default_role_name(),
            role_arn: None,
            embedding_model: default_embedding_model(),
            bucket_name: None,
            bucket_glob: default_bucket_glob(),
            data_source_name: None,
        }
    }
}

fn default_kb_name() -> String {
    "demo-rag".to_string()
}
fn default_kb_description() -> String {
    "Demo knowledge base for RAG".to_string()
}
fn default_role_name() -> String {
    "AmazonBedrockExecutionRoleForKnowledgeBase_Default".to_string()
}
fn default_embedding_model() -> String {
    "amazon.titan-embed-text-v1".to_string()
}
fn default_bucket_glob() -> String {
    "amazon-bedrock-knowledge-base*".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub collection_name: Option<String>,
    /// Shared name of the access, encryption, and network policies.
    #[serde(default = "default_policy_name")]
    pub policy_name: String,
    /// Prefix of the index name and vector field.
    #[serde(default = "default_vector_prefix")]
    pub vector_prefix: String,
    #[serde(default = "default_text_field")]
    pub text_field: String,
    #[serde(default = "default_metadata_field")]
    pub metadata_field: String,
    #[serde(default = "default_dimension")]
    pub dimension: u32,
    #[serde(default = "default_ef_search")]
    pub ef_search: u32,
    /// Extra principals granted data access besides the knowledge base role.
    /// The identity running `kbh provision` must be listed here to create
    /// the index.
    #[serde(default)]
    pub principals: Vec<String>,
    #[serde(default = "default_access_rule_settle_secs")]
    pub access_rule_settle_secs: u64,
    #[serde(default = "default_index_settle_secs")]
    pub index_settle_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            collection_name: None,
            policy_name: default_policy_name(),
            vector_prefix: default_vector_prefix(),
            text_field: default_text_field(),
            metadata_field: default_metadata_field(),
            dimension: default_dimension(),
            ef_search: default_ef_search(),
            principals: Vec::new(),
            access_rule_settle_secs: default_access_rule_settle_secs(),
            index_settle_secs: default_index_settle_secs(),
        }
    }
}

fn default_policy_name() -> String {
    "bedrock-security-policy".to_string()
}
fn default_vector_prefix() -> String {
    "bedrock-knowledge-base-default".to_string()
}
fn default_text_field() -> String {
    "AMAZON_BEDROCK_TEXT_CHUNK".to_string()
}
fn default_metadata_field() -> String {
    "AMAZON_BEDROCK_METADATA".to_string()
}
fn default_dimension() -> u32 {
    1536
}
fn default_ef_search() -> u32 {
    512
}
fn default_access_rule_settle_secs() -> u64 {
    45
}
fn default_index_settle_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            collection_interval_secs: default_collection_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}
fn default_collection_interval_secs() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    500
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What to do when a create call returns failure reasons.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run with an error.
    #[default]
    Abort,
    /// Log the reasons and continue.
    Warn,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub on_create_failure: FailurePolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ModelsConfig {
    /// Model used by `kbh ask` when `--model` is not given.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
        }
    }
}

fn default_model() -> String {
    "anthropic.claude-v2".to_string()
}

impl Config {
    /// Collection name: explicit, or `<kb name>-os-collection`.
    pub fn collection_name(&self) -> String {
        self.vector_store
            .collection_name
            .clone()
            .unwrap_or_else(|| format!("{}-os-collection", self.knowledge_base.name))
    }

    pub fn index_name(&self) -> String {
        format!("{}-index", self.vector_store.vector_prefix)
    }

    pub fn vector_field(&self) -> String {
        format!("{}-vector", self.vector_store.vector_prefix)
    }

    pub fn data_source_name(&self) -> String {
        self.knowledge_base
            .data_source_name
            .clone()
            .unwrap_or_else(|| format!("{}-data-source", self.knowledge_base.name))
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.aws.region.trim().is_empty() {
            bail!("aws.region must not be empty");
        }
        if self.knowledge_base.name.trim().is_empty() {
            bail!("knowledge_base.name must not be empty");
        }
        if self.knowledge_base.embedding_model.trim().is_empty() {
            bail!("knowledge_base.embedding_model must not be empty");
        }
        if self.knowledge_base.bucket_name.is_none() {
            globset::Glob::new(&self.knowledge_base.bucket_glob).with_context(|| {
                format!(
                    "knowledge_base.bucket_glob is not a valid glob: '{}'",
                    self.knowledge_base.bucket_glob
                )
            })?;
        }
        if self.vector_store.policy_name.trim().is_empty() {
            bail!("vector_store.policy_name must not be empty");
        }
        if self.vector_store.vector_prefix.trim().is_empty() {
            bail!("vector_store.vector_prefix must not be empty");
        }
        if self.vector_store.dimension == 0 {
            bail!("vector_store.dimension must be > 0");
        }
        validate_collection_name(&self.collection_name())?;

        if self.polling.interval_secs == 0 || self.polling.collection_interval_secs == 0 {
            bail!("polling intervals must be > 0");
        }
        if self.polling.timeout_secs < self.polling.interval_secs {
            bail!(
                "polling.timeout_secs ({}) must be >= polling.interval_secs ({})",
                self.polling.timeout_secs,
                self.polling.interval_secs
            );
        }
        Ok(())
    }
}

/// OpenSearch Serverless naming rules: 3–32 characters, lowercase letters,
/// digits, and hyphens, starting with a letter.
fn validate_collection_name(name: &str) -> Result<()> {
    let len_ok = (3..=32).contains(&name.len());
    let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(len_ok && starts_ok && chars_ok) {
        bail!(
            "collection name '{}' is invalid: use 3-32 lowercase letters, digits, or hyphens, starting with a letter",
            name
        );
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if given; otherwise load the default path when it exists and
/// fall back to built-in defaults when it does not.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config(default)
            } else {
                tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file, using defaults");
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

/// Commented config written by `kbh init`. Parses to [`Config::default`].
pub const CONFIG_TEMPLATE: &str = r#"# KB Harness configuration.
# Every key is optional; the values below are the defaults.

[aws]
region = "us-east-1"
# Endpoint overrides, e.g. for LocalStack:
# [aws.endpoints]
# aoss = "http://localhost:4566"

[knowledge_base]
name = "demo-rag"
description = "Demo knowledge base for RAG"
role_name = "AmazonBedrockExecutionRoleForKnowledgeBase_Default"
# role_arn = "arn:aws:iam::123456789012:role/MyKnowledgeBaseRole"
embedding_model = "amazon.titan-embed-text-v1"
# bucket_name = "my-documents"
bucket_glob = "amazon-bedrock-knowledge-base*"
# data_source_name = "demo-rag-data-source"

[vector_store]
# collection_name = "demo-rag-os-collection"
policy_name = "bedrock-security-policy"
vector_prefix = "bedrock-knowledge-base-default"
text_field = "AMAZON_BEDROCK_TEXT_CHUNK"
metadata_field = "AMAZON_BEDROCK_METADATA"
dimension = 1536
ef_search = 512
# Identities allowed to read/write the collection besides the KB role.
# Include the identity that runs `kbh provision`.
principals = []
access_rule_settle_secs = 45
index_settle_secs = 30

[polling]
interval_secs = 10
collection_interval_secs = 30
timeout_secs = 500

[orchestration]
# "abort" stops on service-reported create failures, "warn" logs and continues.
on_create_failure = "abort"

[models]
default_model = "anthropic.claude-v2"
"#;

/// Write [`CONFIG_TEMPLATE`] to `path`, creating parent directories.
/// Refuses to overwrite an existing file.
pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.knowledge_base.name, "demo-rag");
        assert_eq!(cfg.collection_name(), "demo-rag-os-collection");
        assert_eq!(cfg.index_name(), "bedrock-knowledge-base-default-index");
        assert_eq!(cfg.vector_field(), "bedrock-knowledge-base-default-vector");
        assert_eq!(cfg.data_source_name(), "demo-rag-data-source");
        assert_eq!(cfg.polling.timeout(), Duration::from_secs(500));
        assert_eq!(cfg.orchestration.on_create_failure, FailurePolicy::Abort);
    }

    #[test]
    fn template_matches_defaults() {
        let cfg: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[knowledge_base]
name = "handbook"
bucket_name = "handbook-docs"

[orchestration]
on_create_failure = "warn"
"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.collection_name(), "handbook-os-collection");
        assert_eq!(cfg.knowledge_base.bucket_name.as_deref(), Some("handbook-docs"));
        assert_eq!(cfg.orchestration.on_create_failure, FailurePolicy::Warn);
        assert_eq!(cfg.polling.collection_interval_secs, 30);
    }

    #[test]
    fn rejects_bad_collection_names() {
        for name in ["ab", "Upper-case", "1starts-with-digit", "has_underscore"] {
            let mut cfg = Config::default();
            cfg.vector_store.collection_name = Some(name.to_string());
            assert!(cfg.validate().is_err(), "accepted {}", name);
        }
        let mut cfg = Config::default();
        cfg.knowledge_base.name = "a-knowledge-base-with-a-long-name".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_timeout_shorter_than_interval() {
        let mut cfg = Config::default();
        cfg.polling.timeout_secs = 5;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("timeout_secs"), "{}", err);
    }

    #[test]
    fn rejects_zero_dimension_and_bad_glob() {
        let mut cfg = Config::default();
        cfg.vector_store.dimension = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.knowledge_base.bucket_glob = "amazon-[".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_failure_policy_is_a_parse_error() {
        let parsed: Result<Config, _> = toml::from_str("[orchestration]\non_create_failure = \"ignore\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn write_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config").join("kbh.toml");
        write_default_config(&path).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(write_default_config(&path).is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.toml");
        let err = load_or_default(Some(&missing)).unwrap_err().to_string();
        assert!(err.contains("Failed to read config file"), "{}", err);
    }
}
