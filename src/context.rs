//! Deployment context: every value the orchestrators need, resolved once.
//!
//! Built at process start from [`Config`] plus two account lookups (the
//! knowledge base role ARN and the source bucket) and then passed by
//! reference to [`provision`](crate::provision::provision) and
//! [`deprovision`](crate::deprovision::deprovision).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use globset::Glob;
use serde_json::{json, Value};
use tracing::info;

use crate::config::{Config, FailurePolicy};
use crate::models::{
    CollectionRequest, DataSourceRequest, FieldMapping, KnowledgeBaseRequest, PolicyKind,
    SecurityPolicy, VectorIndexSpec,
};
use crate::poll::PollSpec;
use crate::traits::AccountApi;

#[derive(Debug, Clone, PartialEq)]
pub struct DeployContext {
    pub region: String,
    pub kb_name: String,
    pub kb_description: String,
    pub role_arn: String,
    pub embedding_model_arn: String,
    pub bucket_name: String,
    pub data_source_name: String,
    pub collection_name: String,
    pub policy_name: String,
    pub principals: Vec<String>,
    pub index: VectorIndexSpec,
    pub poll_interval: Duration,
    pub collection_poll_interval: Duration,
    pub poll_timeout: Duration,
    /// Wait before index creation so new data access rules take effect.
    pub access_rule_settle: Duration,
    /// Wait after index creation before the knowledge base references it.
    pub index_settle: Duration,
    pub on_create_failure: FailurePolicy,
}

impl DeployContext {
    /// Resolve the role ARN and bucket through `account`, then derive the
    /// rest from `config`.
    pub async fn resolve(config: &Config, account: &dyn AccountApi) -> Result<Self> {
        let kb = &config.knowledge_base;

        let role_arn = match &kb.role_arn {
            Some(arn) => arn.clone(),
            None => account
                .role_arn(&kb.role_name)
                .await
                .with_context(|| format!("Failed to look up IAM role '{}'", kb.role_name))?,
        };
        info!(role_arn = %role_arn, "Resolved knowledge base role");

        let bucket_name = match &kb.bucket_name {
            Some(name) => name.clone(),
            None => {
                let buckets = account.list_buckets().await.context("Failed to list buckets")?;
                select_bucket(&buckets, &kb.bucket_glob)?
            }
        };
        info!(bucket = %bucket_name, "Resolved source bucket");

        Ok(Self::with_resolved(config, role_arn, bucket_name))
    }

    /// Build a context from already-known role ARN and bucket name.
    pub fn with_resolved(config: &Config, role_arn: String, bucket_name: String) -> Self {
        let vs = &config.vector_store;
        Self {
            region: config.aws.region.clone(),
            kb_name: config.knowledge_base.name.clone(),
            kb_description: config.knowledge_base.description.clone(),
            role_arn,
            embedding_model_arn: foundation_model_arn(
                &config.aws.region,
                &config.knowledge_base.embedding_model,
            ),
            bucket_name,
            data_source_name: config.data_source_name(),
            collection_name: config.collection_name(),
            policy_name: vs.policy_name.clone(),
            principals: vs.principals.clone(),
            index: VectorIndexSpec {
                name: config.index_name(),
                fields: FieldMapping {
                    vector_field: config.vector_field(),
                    text_field: vs.text_field.clone(),
                    metadata_field: vs.metadata_field.clone(),
                },
                dimension: vs.dimension,
                ef_search: vs.ef_search,
            },
            poll_interval: config.polling.interval(),
            collection_poll_interval: config.polling.collection_interval(),
            poll_timeout: config.polling.timeout(),
            access_rule_settle: Duration::from_secs(vs.access_rule_settle_secs),
            index_settle: Duration::from_secs(vs.index_settle_secs),
            on_create_failure: config.orchestration.on_create_failure,
        }
    }

    /// Context for teardown, which only needs resource names. Role and
    /// bucket are taken from the config when set and left empty otherwise.
    pub fn for_teardown(config: &Config) -> Self {
        let kb = &config.knowledge_base;
        Self::with_resolved(
            config,
            kb.role_arn.clone().unwrap_or_default(),
            kb.bucket_name.clone().unwrap_or_default(),
        )
    }

    pub fn bucket_arn(&self) -> String {
        format!("arn:aws:s3:::{}", self.bucket_name)
    }

    /// Poll spec with the default interval and timeout.
    pub fn poll_spec(&self, operation: &str) -> PollSpec {
        PollSpec::new(operation, self.poll_interval, self.poll_timeout)
    }

    pub fn collection_poll_spec(&self) -> PollSpec {
        PollSpec::new(
            format!("collection '{}' activation", self.collection_name),
            self.collection_poll_interval,
            self.poll_timeout,
        )
    }

    /// The policy document for `kind`. Rules cover every collection and
    /// index in the account, so one set of policies serves repeated runs.
    pub fn policy(&self, kind: PolicyKind) -> SecurityPolicy {
        let (description, document) = match kind {
            PolicyKind::Access => {
                let mut principals = vec![self.role_arn.clone()];
                principals.extend(self.principals.iter().cloned());
                (
                    "Default access policy for Amazon OpenSearch Service",
                    json!([{
                        "Rules": [
                            {
                                "Resource": ["collection/*"],
                                "Permission": [
                                    "aoss:DescribeCollectionItems",
                                    "aoss:CreateCollectionItems",
                                    "aoss:UpdateCollectionItems"
                                ],
                                "ResourceType": "collection"
                            },
                            {
                                "Resource": ["index/*/*"],
                                "Permission": [
                                    "aoss:UpdateIndex",
                                    "aoss:DescribeIndex",
                                    "aoss:ReadDocument",
                                    "aoss:WriteDocument",
                                    "aoss:CreateIndex"
                                ],
                                "ResourceType": "index"
                            }
                        ],
                        "Principal": principals,
                        "Description": ""
                    }]),
                )
            }
            PolicyKind::Encryption => (
                "Default security policy for Amazon OpenSearch Service",
                json!({
                    "Rules": [{ "Resource": ["collection/*"], "ResourceType": "collection" }],
                    "AWSOwnedKey": true
                }),
            ),
            PolicyKind::Network => (
                "Default security policy for Amazon OpenSearch Service",
                json!([{
                    "Rules": [
                        { "Resource": ["collection/*"], "ResourceType": "dashboard" },
                        { "Resource": ["collection/*"], "ResourceType": "collection" }
                    ],
                    "AllowFromPublic": true
                }]),
            ),
        };
        SecurityPolicy {
            name: self.policy_name.clone(),
            kind,
            description: description.to_string(),
            document,
        }
    }

    pub fn collection_request(&self) -> CollectionRequest {
        CollectionRequest {
            name: self.collection_name.clone(),
            description: self.kb_description.clone(),
            standby_replicas: false,
        }
    }

    pub fn knowledge_base_request(&self, collection_arn: &str) -> KnowledgeBaseRequest {
        KnowledgeBaseRequest {
            name: self.kb_name.clone(),
            description: self.kb_description.clone(),
            role_arn: self.role_arn.clone(),
            embedding_model_arn: self.embedding_model_arn.clone(),
            collection_arn: collection_arn.to_string(),
            vector_index_name: self.index.name.clone(),
            fields: self.index.fields.clone(),
        }
    }

    pub fn data_source_request(&self, knowledge_base_id: &str) -> DataSourceRequest {
        DataSourceRequest {
            knowledge_base_id: knowledge_base_id.to_string(),
            name: self.data_source_name.clone(),
            description: format!("{} data source", self.kb_name),
            bucket_arn: self.bucket_arn(),
        }
    }

    /// Resolved values as JSON, logged before a run.
    pub fn describe(&self) -> Value {
        json!({
            "region": self.region,
            "knowledge_base": self.kb_name,
            "role_arn": self.role_arn,
            "embedding_model_arn": self.embedding_model_arn,
            "bucket_arn": self.bucket_arn(),
            "collection": self.collection_name,
            "index": self.index.name,
            "policy": self.policy_name,
        })
    }
}

/// ARN of a foundation model in `region`.
pub fn foundation_model_arn(region: &str, model_id: &str) -> String {
    format!("arn:aws:bedrock:{}::foundation-model/{}", region, model_id)
}

/// First bucket (in listing order) whose name matches `pattern`.
pub fn select_bucket(buckets: &[String], pattern: &str) -> Result<String> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("Invalid bucket glob: '{}'", pattern))?
        .compile_matcher();
    match buckets.iter().find(|b| matcher.is_match(b.as_str())) {
        Some(name) => Ok(name.clone()),
        None => bail!(
            "No bucket matches '{}' ({} buckets listed). Set knowledge_base.bucket_name or create the bucket first.",
            pattern,
            buckets.len()
        ),
    }
}
