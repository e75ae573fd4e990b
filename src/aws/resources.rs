//! [`ResourceApi`] over OpenSearch Serverless, the collection index API, and
//! the Bedrock agent control plane.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use super::{client_token, field, parse_json, ApiRequest, AwsClient, Endpoint, Service};
use crate::error::ApiError;
use crate::models::{
    Collection, CollectionRequest, DataSource, DataSourceRequest, DataSourceStatus,
    DataSourceSummary, IngestionJob, KnowledgeBase, KnowledgeBaseRequest, KnowledgeBaseStatus,
    KnowledgeBaseSummary, PolicyDetail, PolicyKind, SecurityPolicy, VectorIndexSpec,
};
use crate::traits::ResourceApi;

const PAGE_SIZE: u32 = 100;

/// `(operation suffix, detail field)` for a policy kind. Data access
/// policies have their own API; encryption and network share one.
fn policy_api(kind: PolicyKind) -> (&'static str, &'static str) {
    match kind {
        PolicyKind::Access => ("AccessPolicy", "accessPolicyDetail"),
        PolicyKind::Encryption | PolicyKind::Network => ("SecurityPolicy", "securityPolicyDetail"),
    }
}

impl AwsClient {
    /// Signed request against a collection's own endpoint.
    fn index_request(
        &self,
        collection: &Collection,
        method: Method,
        index: &str,
        body: Option<&Value>,
    ) -> Result<ApiRequest, ApiError> {
        let endpoint = match collection.endpoint.as_deref() {
            Some(url) => Endpoint::parse(url),
            None => {
                return Err(ApiError::decode(
                    Service::Aoss.key(),
                    format!("collection '{}' has no endpoint", collection.name),
                ))
            }
        };
        let (headers, body) = match body {
            Some(v) => (
                vec![("content-type".to_string(), "application/json".to_string())],
                v.to_string().into_bytes(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        Ok(ApiRequest {
            service: Service::Aoss,
            endpoint,
            method,
            path: format!("/{}", index),
            query: Vec::new(),
            headers,
            body,
        })
    }

    /// Follow `nextToken` through a bedrock-agent list operation.
    async fn agent_list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        items_field: &str,
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "maxResults": PAGE_SIZE });
            if let Some(ref token) = next_token {
                body["nextToken"] = json!(token);
            }
            let page = self
                .rest_json(Service::BedrockAgent, Method::POST, path, Vec::new(), Some(&body))
                .await?;
            let batch: Vec<T> = field(Service::BedrockAgent, &page, items_field)?;
            items.extend(batch);
            next_token = page
                .get("nextToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if next_token.is_none() {
                return Ok(items);
            }
        }
    }
}

#[async_trait]
impl ResourceApi for AwsClient {
    // ═══════════════════════════════════════════════════════════════════
    // OpenSearch Serverless policies
    // ═══════════════════════════════════════════════════════════════════

    async fn get_policy(&self, kind: PolicyKind, name: &str) -> Result<PolicyDetail, ApiError> {
        let (suffix, detail) = policy_api(kind);
        let reply = self
            .aoss_json(
                &format!("Get{}", suffix),
                &json!({ "name": name, "type": kind.wire_type() }),
            )
            .await?;
        field(Service::Aoss, &reply, detail)
    }

    async fn create_policy(&self, policy: &SecurityPolicy) -> Result<PolicyDetail, ApiError> {
        let (suffix, detail) = policy_api(policy.kind);
        let reply = self
            .aoss_json(
                &format!("Create{}", suffix),
                &json!({
                    "name": policy.name,
                    "type": policy.kind.wire_type(),
                    "description": policy.description,
                    "policy": policy.document.to_string(),
                    "clientToken": client_token(),
                }),
            )
            .await?;
        field(Service::Aoss, &reply, detail)
    }

    async fn delete_policy(&self, kind: PolicyKind, name: &str) -> Result<(), ApiError> {
        let (suffix, _) = policy_api(kind);
        self.aoss_json(
            &format!("Delete{}", suffix),
            &json!({
                "name": name,
                "type": kind.wire_type(),
                "clientToken": client_token(),
            }),
        )
        .await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Collections
    // ═══════════════════════════════════════════════════════════════════

    async fn get_collections(&self, name: &str) -> Result<Vec<Collection>, ApiError> {
        let reply = self
            .aoss_json("BatchGetCollection", &json!({ "names": [name] }))
            .await?;
        field(Service::Aoss, &reply, "collectionDetails")
    }

    async fn create_collection(&self, request: &CollectionRequest) -> Result<Collection, ApiError> {
        let reply = self
            .aoss_json(
                "CreateCollection",
                &json!({
                    "name": request.name,
                    "type": "VECTORSEARCH",
                    "description": request.description,
                    "standbyReplicas": if request.standby_replicas { "ENABLED" } else { "DISABLED" },
                    "clientToken": client_token(),
                }),
            )
            .await?;
        field(Service::Aoss, &reply, "createCollectionDetail")
    }

    async fn list_collections(&self, name: &str) -> Result<Vec<Collection>, ApiError> {
        let mut collections = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({
                "collectionFilters": { "name": name },
                "maxResults": PAGE_SIZE,
            });
            if let Some(ref token) = next_token {
                body["nextToken"] = json!(token);
            }
            let page = self.aoss_json("ListCollections", &body).await?;
            let batch: Vec<Collection> = field(Service::Aoss, &page, "collectionSummaries")?;
            collections.extend(batch);
            next_token = page
                .get("nextToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if next_token.is_none() {
                return Ok(collections);
            }
        }
    }

    async fn delete_collection(&self, id: &str) -> Result<Collection, ApiError> {
        let reply = self
            .aoss_json(
                "DeleteCollection",
                &json!({ "id": id, "clientToken": client_token() }),
            )
            .await?;
        field(Service::Aoss, &reply, "deleteCollectionDetail")
    }

    // ═══════════════════════════════════════════════════════════════════
    // Vector index (collection endpoint)
    // ═══════════════════════════════════════════════════════════════════

    async fn index_exists(&self, collection: &Collection, index: &str) -> Result<bool, ApiError> {
        let request = self.index_request(collection, Method::HEAD, index, None)?;
        let response = self.send(request).await?;
        match response.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(ApiError::service(
                Service::Aoss.key(),
                status,
                format!("HTTP{}", status),
                format!("HEAD /{} failed", index),
            )),
        }
    }

    async fn create_index(
        &self,
        collection: &Collection,
        spec: &VectorIndexSpec,
    ) -> Result<Value, ApiError> {
        let request =
            self.index_request(collection, Method::PUT, &spec.name, Some(&spec.body()))?;
        let text = self.send_checked(request).await?;
        parse_json(Service::Aoss, &text)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Knowledge bases
    // ═══════════════════════════════════════════════════════════════════

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseSummary>, ApiError> {
        self.agent_list("/knowledgebases/", "knowledgeBaseSummaries")
            .await
    }

    async fn create_knowledge_base(
        &self,
        request: &KnowledgeBaseRequest,
    ) -> Result<KnowledgeBase, ApiError> {
        let body = json!({
            "clientToken": client_token(),
            "name": request.name,
            "description": request.description,
            "roleArn": request.role_arn,
            "knowledgeBaseConfiguration": {
                "type": "VECTOR",
                "vectorKnowledgeBaseConfiguration": {
                    "embeddingModelArn": request.embedding_model_arn,
                },
            },
            "storageConfiguration": {
                "type": "OPENSEARCH_SERVERLESS",
                "opensearchServerlessConfiguration": {
                    "collectionArn": request.collection_arn,
                    "vectorIndexName": request.vector_index_name,
                    "fieldMapping": request.fields,
                },
            },
        });
        let reply = self
            .rest_json(
                Service::BedrockAgent,
                Method::PUT,
                "/knowledgebases/",
                Vec::new(),
                Some(&body),
            )
            .await?;
        field(Service::BedrockAgent, &reply, "knowledgeBase")
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<KnowledgeBase, ApiError> {
        let reply = self
            .rest_json(
                Service::BedrockAgent,
                Method::GET,
                &format!("/knowledgebases/{}", id),
                Vec::new(),
                None,
            )
            .await?;
        field(Service::BedrockAgent, &reply, "knowledgeBase")
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<KnowledgeBaseStatus, ApiError> {
        let reply = self
            .rest_json(
                Service::BedrockAgent,
                Method::DELETE,
                &format!("/knowledgebases/{}", id),
                Vec::new(),
                None,
            )
            .await?;
        field(Service::BedrockAgent, &reply, "status")
    }

    // ═══════════════════════════════════════════════════════════════════
    // Data sources and ingestion jobs
    // ═══════════════════════════════════════════════════════════════════

    async fn list_data_sources(
        &self,
        knowledge_base_id: &str,
    ) -> Result<Vec<DataSourceSummary>, ApiError> {
        self.agent_list(
            &format!("/knowledgebases/{}/datasources/", knowledge_base_id),
            "dataSourceSummaries",
        )
        .await
    }

    async fn create_data_source(
        &self,
        request: &DataSourceRequest,
    ) -> Result<DataSource, ApiError> {
        let body = json!({
            "clientToken": client_token(),
            "name": request.name,
            "description": request.description,
            "dataSourceConfiguration": {
                "type": "S3",
                "s3Configuration": { "bucketArn": request.bucket_arn },
            },
        });
        let reply = self
            .rest_json(
                Service::BedrockAgent,
                Method::PUT,
                &format!("/knowledgebases/{}/datasources/", request.knowledge_base_id),
                Vec::new(),
                Some(&body),
            )
            .await?;
        field(Service::BedrockAgent, &reply, "dataSource")
    }

    async fn delete_data_source(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> Result<DataSourceStatus, ApiError> {
        let reply = self
            .rest_json(
                Service::BedrockAgent,
                Method::DELETE,
                &format!(
                    "/knowledgebases/{}/datasources/{}",
                    knowledge_base_id, data_source_id
                ),
                Vec::new(),
                None,
            )
            .await?;
        field(Service::BedrockAgent, &reply, "status")
    }

    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        description: &str,
    ) -> Result<IngestionJob, ApiError> {
        let body = json!({
            "clientToken": client_token(),
            "description": description,
        });
        let reply = self
            .rest_json(
                Service::BedrockAgent,
                Method::PUT,
                &format!(
                    "/knowledgebases/{}/datasources/{}/ingestionjobs/",
                    knowledge_base_id, data_source_id
                ),
                Vec::new(),
                Some(&body),
            )
            .await?;
        field(Service::BedrockAgent, &reply, "ingestionJob")
    }

    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        ingestion_job_id: &str,
    ) -> Result<IngestionJob, ApiError> {
        let reply = self
            .rest_json(
                Service::BedrockAgent,
                Method::GET,
                &format!(
                    "/knowledgebases/{}/datasources/{}/ingestionjobs/{}",
                    knowledge_base_id, data_source_id, ingestion_job_id
                ),
                Vec::new(),
                None,
            )
            .await?;
        field(Service::BedrockAgent, &reply, "ingestionJob")
    }
}
