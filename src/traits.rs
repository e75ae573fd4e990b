//! Service seams the orchestrators are written against.
//!
//! Three traits split the cloud surface by concern:
//!
//! ```text
//! ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │   ResourceApi    │  │    AccountApi    │  │     ModelApi     │
//! │ policies, coll., │  │ IAM role lookup, │  │ list / invoke FM │
//! │ index, KB, DS,   │  │ bucket listing   │  │ retrieve+generate│
//! │ ingestion jobs   │  │                  │  │                  │
//! └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘
//!          ▼                     ▼                     ▼
//!   provision/deprovision   DeployContext         ask / invoke
//! ```
//!
//! [`AwsClient`](crate::aws::AwsClient) implements all three against the
//! real services; [`InMemoryCloud`](crate::memory::InMemoryCloud) implements
//! them in memory for tests.
//!
//! Every lookup that targets a single resource reports absence as
//! [`ApiError::NotFound`]; callers turn that into `Option` with
//! [`found`](crate::ensure::found).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;
use crate::models::{
    Collection, CollectionRequest, DataSource, DataSourceRequest, DataSourceStatus,
    DataSourceSummary, FoundationModelSummary, IngestionJob, KnowledgeBase, KnowledgeBaseRequest,
    KnowledgeBaseStatus, KnowledgeBaseSummary, PolicyDetail, PolicyKind, RagAnswer, RagRequest,
    SecurityPolicy, VectorIndexSpec,
};

// ═══════════════════════════════════════════════════════════════════════
// ResourceApi
// ═══════════════════════════════════════════════════════════════════════

/// Create/get/delete for every resource the RAG stack is built from.
///
/// Implementations perform exactly one remote operation per call (listings
/// may follow pagination tokens) and never retry.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Look up a policy by `(kind, name)`. Absent → [`ApiError::NotFound`].
    async fn get_policy(&self, kind: PolicyKind, name: &str) -> Result<PolicyDetail, ApiError>;

    async fn create_policy(&self, policy: &SecurityPolicy) -> Result<PolicyDetail, ApiError>;

    async fn delete_policy(&self, kind: PolicyKind, name: &str) -> Result<(), ApiError>;

    /// Detailed lookup by exact name (includes the endpoint). An empty
    /// vector means no such collection.
    async fn get_collections(&self, name: &str) -> Result<Vec<Collection>, ApiError>;

    async fn create_collection(&self, request: &CollectionRequest) -> Result<Collection, ApiError>;

    /// Summary listing filtered by name. Used to confirm deletion.
    async fn list_collections(&self, name: &str) -> Result<Vec<Collection>, ApiError>;

    async fn delete_collection(&self, id: &str) -> Result<Collection, ApiError>;

    async fn index_exists(&self, collection: &Collection, index: &str) -> Result<bool, ApiError>;

    /// Create a vector index on the collection endpoint. Returns the raw
    /// acknowledgement body.
    async fn create_index(
        &self,
        collection: &Collection,
        spec: &VectorIndexSpec,
    ) -> Result<Value, ApiError>;

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseSummary>, ApiError>;

    async fn create_knowledge_base(
        &self,
        request: &KnowledgeBaseRequest,
    ) -> Result<KnowledgeBase, ApiError>;

    /// Absent → [`ApiError::NotFound`]; this is how deletion is confirmed.
    async fn get_knowledge_base(&self, id: &str) -> Result<KnowledgeBase, ApiError>;

    async fn delete_knowledge_base(&self, id: &str) -> Result<KnowledgeBaseStatus, ApiError>;

    async fn list_data_sources(
        &self,
        knowledge_base_id: &str,
    ) -> Result<Vec<DataSourceSummary>, ApiError>;

    async fn create_data_source(&self, request: &DataSourceRequest)
        -> Result<DataSource, ApiError>;

    async fn delete_data_source(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> Result<DataSourceStatus, ApiError>;

    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        description: &str,
    ) -> Result<IngestionJob, ApiError>;

    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        ingestion_job_id: &str,
    ) -> Result<IngestionJob, ApiError>;
}

// ═══════════════════════════════════════════════════════════════════════
// AccountApi
// ═══════════════════════════════════════════════════════════════════════

/// Account-level lookups used once at startup to resolve deployment values.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn role_arn(&self, role_name: &str) -> Result<String, ApiError>;

    async fn list_buckets(&self) -> Result<Vec<String>, ApiError>;
}

// ═══════════════════════════════════════════════════════════════════════
// ModelApi
// ═══════════════════════════════════════════════════════════════════════

/// Foundation-model calls: discovery, direct invocation, and
/// knowledge-base-augmented generation.
#[async_trait]
pub trait ModelApi: Send + Sync {
    /// On-demand models with text output.
    async fn list_foundation_models(&self) -> Result<Vec<FoundationModelSummary>, ApiError>;

    /// Send a model-specific JSON body; returns the model-specific JSON reply.
    async fn invoke_model(&self, model_id: &str, body: &Value) -> Result<Value, ApiError>;

    async fn retrieve_and_generate(&self, request: &RagRequest) -> Result<RagAnswer, ApiError>;
}
