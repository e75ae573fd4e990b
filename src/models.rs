//! Core data models used throughout KB Harness.
//!
//! These types describe the externally owned cloud resources that the
//! orchestrators create, inspect, and delete. None of them is persisted
//! locally; each value is a snapshot of what the service last reported.
//!
//! Wire names follow the service JSON (`camelCase` fields, `SCREAMING_CASE`
//! statuses) so the same types deserialize straight from API responses.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ═══════════════════════════════════════════════════════════════════════
// Security policies
// ═══════════════════════════════════════════════════════════════════════

/// The three OpenSearch Serverless policy types a vector collection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Data access policy (wire type `data`).
    #[serde(rename = "data")]
    Access,
    #[serde(rename = "encryption")]
    Encryption,
    #[serde(rename = "network")]
    Network,
}

impl PolicyKind {
    /// Provisioning order. Teardown walks the same order.
    pub const ALL: [PolicyKind; 3] = [PolicyKind::Access, PolicyKind::Encryption, PolicyKind::Network];

    /// The `type` value sent to the service.
    pub fn wire_type(self) -> &'static str {
        match self {
            PolicyKind::Access => "data",
            PolicyKind::Encryption => "encryption",
            PolicyKind::Network => "network",
        }
    }

    /// Human label used in logs and reports.
    pub fn label(self) -> &'static str {
        match self {
            PolicyKind::Access => "access policy",
            PolicyKind::Encryption => "encryption policy",
            PolicyKind::Network => "network policy",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A policy to be created: name, kind, and the JSON rule document.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    pub name: String,
    pub kind: PolicyKind,
    pub description: String,
    pub document: Value,
}

/// A policy as reported by the service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDetail {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    #[serde(default)]
    pub policy_version: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Vector collection and index
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionStatus {
    Creating,
    Active,
    Deleting,
    Failed,
    #[serde(other)]
    Unknown,
}

/// A vector-search collection. The endpoint is only present on detailed
/// lookups, not on create or list responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arn: String,
    pub status: CollectionStatus,
    #[serde(default, rename = "collectionEndpoint")]
    pub endpoint: Option<String>,
}

impl Collection {
    /// Endpoint host without the scheme, as used to address the index API.
    pub fn host(&self) -> Option<&str> {
        self.endpoint.as_deref().map(|e| {
            e.trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRequest {
    pub name: String,
    pub description: String,
    pub standby_replicas: bool,
}

/// Mapping and k-NN settings of the vector index the knowledge base writes to.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexSpec {
    pub name: String,
    pub fields: FieldMapping,
    pub dimension: u32,
    pub ef_search: u32,
}

impl VectorIndexSpec {
    /// Request body for index creation: HNSW over cosine similarity, text
    /// chunk stored and searchable, metadata stored but not indexed.
    pub fn body(&self) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.fields.metadata_field.clone(),
            json!({ "type": "text", "index": false }),
        );
        properties.insert(self.fields.text_field.clone(), json!({ "type": "text" }));
        properties.insert(
            self.fields.vector_field.clone(),
            json!({
                "type": "knn_vector",
                "dimension": self.dimension,
                "method": {
                    "engine": "nmslib",
                    "space_type": "cosinesimil",
                    "name": "hnsw",
                    "parameters": {}
                }
            }),
        );
        json!({
            "settings": {
                "index": {
                    "knn.algo_param": { "ef_search": self.ef_search.to_string() },
                    "knn": "true"
                }
            },
            "mappings": { "properties": Value::Object(properties) }
        })
    }
}

/// Which index fields hold the vector, the chunk text, and the metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub vector_field: String,
    pub text_field: String,
    pub metadata_field: String,
}

// ═══════════════════════════════════════════════════════════════════════
// Knowledge base, data source, ingestion job
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KnowledgeBaseStatus {
    Creating,
    Active,
    Deleting,
    Updating,
    Failed,
    DeleteUnsuccessful,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseSummary {
    #[serde(rename = "knowledgeBaseId")]
    pub id: String,
    pub name: String,
    pub status: KnowledgeBaseStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    #[serde(rename = "knowledgeBaseId")]
    pub id: String,
    pub name: String,
    #[serde(default, rename = "knowledgeBaseArn")]
    pub arn: String,
    pub status: KnowledgeBaseStatus,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
}

/// Everything needed to create a vector knowledge base on top of an
/// OpenSearch Serverless collection.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBaseRequest {
    pub name: String,
    pub description: String,
    pub role_arn: String,
    pub embedding_model_arn: String,
    pub collection_arn: String,
    pub vector_index_name: String,
    pub fields: FieldMapping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceStatus {
    Available,
    Deleting,
    DeleteUnsuccessful,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSummary {
    #[serde(rename = "dataSourceId")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub knowledge_base_id: String,
    pub status: DataSourceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    #[serde(rename = "dataSourceId")]
    pub id: String,
    pub name: String,
    pub knowledge_base_id: String,
    pub status: DataSourceStatus,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
}

/// A bucket-backed data source under a knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceRequest {
    pub knowledge_base_id: String,
    pub name: String,
    pub description: String,
    pub bucket_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    Starting,
    InProgress,
    Complete,
    Failed,
    Stopping,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl IngestionStatus {
    /// Terminal states other than `COMPLETE`.
    pub fn is_failure(&self) -> bool {
        matches!(self, IngestionStatus::Failed | IngestionStatus::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    #[serde(rename = "ingestionJobId")]
    pub id: String,
    pub knowledge_base_id: String,
    pub data_source_id: String,
    pub status: IngestionStatus,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
    #[serde(default)]
    pub statistics: Option<Value>,
}

// ═══════════════════════════════════════════════════════════════════════
// Foundation models and retrieval
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundationModelSummary {
    pub model_id: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
}

/// A prompt answered by a model with retrieval from a knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct RagRequest {
    pub prompt: String,
    pub knowledge_base_id: String,
    pub model_arn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub text: String,
    pub session_id: Option<String>,
    /// S3 URIs (or other locations) of the retrieved passages.
    pub sources: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════════

/// Resource categories named in orchestration reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Policy(PolicyKind),
    Collection,
    Index,
    KnowledgeBase,
    DataSource,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Policy(kind) => write!(f, "{}", kind),
            ResourceKind::Collection => f.write_str("collection"),
            ResourceKind::Index => f.write_str("index"),
            ResourceKind::KnowledgeBase => f.write_str("knowledge base"),
            ResourceKind::DataSource => f.write_str("data source"),
        }
    }
}

/// A resource touched by an orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_kind_wire_names() {
        let types: Vec<_> = PolicyKind::ALL.iter().map(|k| k.wire_type()).collect();
        assert_eq!(types, vec!["data", "encryption", "network"]);
        let detail: PolicyDetail =
            serde_json::from_value(json!({"name": "p", "type": "data", "policyVersion": "v1"}))
                .unwrap();
        assert_eq!(detail.kind, PolicyKind::Access);
    }

    #[test]
    fn collection_host_strips_scheme() {
        let c: Collection = serde_json::from_value(json!({
            "id": "abc",
            "name": "demo-rag-os-collection",
            "arn": "arn:aws:aoss:us-east-1:1:collection/abc",
            "status": "ACTIVE",
            "collectionEndpoint": "https://abc.us-east-1.aoss.amazonaws.com"
        }))
        .unwrap();
        assert_eq!(c.status, CollectionStatus::Active);
        assert_eq!(c.host(), Some("abc.us-east-1.aoss.amazonaws.com"));
    }

    #[test]
    fn unknown_statuses_do_not_fail_decoding() {
        let s: CollectionStatus = serde_json::from_value(json!("UPDATING")).unwrap();
        assert_eq!(s, CollectionStatus::Unknown);
        let j: IngestionStatus = serde_json::from_value(json!("IN_PROGRESS")).unwrap();
        assert_eq!(j, IngestionStatus::InProgress);
        assert!(IngestionStatus::Failed.is_failure());
        assert!(!IngestionStatus::Complete.is_failure());
    }

    #[test]
    fn index_body_uses_configured_fields() {
        let spec = VectorIndexSpec {
            name: "bedrock-knowledge-base-default-index".into(),
            fields: FieldMapping {
                vector_field: "bedrock-knowledge-base-default-vector".into(),
                text_field: "AMAZON_BEDROCK_TEXT_CHUNK".into(),
                metadata_field: "AMAZON_BEDROCK_METADATA".into(),
            },
            dimension: 1536,
            ef_search: 512,
        };
        let body = spec.body();
        let props = &body["mappings"]["properties"];
        assert_eq!(
            props["bedrock-knowledge-base-default-vector"]["dimension"],
            1536
        );
        assert_eq!(props["AMAZON_BEDROCK_METADATA"]["index"], false);
        assert_eq!(body["settings"]["index"]["knn.algo_param"]["ef_search"], "512");
    }
}
