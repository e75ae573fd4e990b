//! In-memory cloud for tests and offline runs.
//!
//! [`InMemoryCloud`] implements [`ResourceApi`], [`AccountApi`], and
//! [`ModelApi`] over plain collections behind a `Mutex`. It records every
//! call in order ([`InMemoryCloud::calls`]) and models the asynchronous
//! parts of the real services with scripted poll counts: a new collection
//! reports `CREATING` for a configurable number of lookups, deleted
//! resources linger in `DELETING`, ingestion jobs stay `IN_PROGRESS`.
//!
//! It also enforces the dependency rules the real services enforce, so an
//! orchestrator that violates them fails loudly in tests:
//!
//! - a collection needs an encryption policy covering it;
//! - an index needs a data access policy and an `ACTIVE` collection, and
//!   index calls are refused until [`InMemoryCloud::with_access_rule_delay`]
//!   has passed since the access policy or collection was created;
//! - a knowledge base cannot be deleted while it still has data sources;
//! - a collection cannot be deleted while a knowledge base points at it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::error::ApiError;
use crate::foundation::ModelFamily;
use crate::models::{
    Collection, CollectionRequest, CollectionStatus, DataSource, DataSourceRequest,
    DataSourceStatus, DataSourceSummary, FoundationModelSummary, IngestionJob, IngestionStatus,
    KnowledgeBase, KnowledgeBaseRequest, KnowledgeBaseStatus, KnowledgeBaseSummary, PolicyDetail,
    PolicyKind, RagAnswer, RagRequest, SecurityPolicy, VectorIndexSpec,
};
use crate::traits::{AccountApi, ModelApi, ResourceApi};

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "123456789012";

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetPolicy(PolicyKind, String),
    CreatePolicy(PolicyKind, String),
    DeletePolicy(PolicyKind, String),
    GetCollections(String),
    CreateCollection(String),
    ListCollections(String),
    DeleteCollection(String),
    IndexExists(String),
    CreateIndex(String),
    ListKnowledgeBases,
    CreateKnowledgeBase(String),
    GetKnowledgeBase(String),
    DeleteKnowledgeBase(String),
    ListDataSources(String),
    CreateDataSource {
        knowledge_base_id: String,
        name: String,
    },
    DeleteDataSource {
        knowledge_base_id: String,
        data_source_id: String,
    },
    StartIngestionJob {
        knowledge_base_id: String,
        data_source_id: String,
    },
    GetIngestionJob(String),
    RoleArn(String),
    ListBuckets,
    ListFoundationModels,
    InvokeModel(String),
    RetrieveAndGenerate(String),
}

impl Call {
    /// Operation name, used to target [`InMemoryCloud::fail_next`].
    pub fn operation(&self) -> &'static str {
        match self {
            Call::GetPolicy(..) => "GetPolicy",
            Call::CreatePolicy(..) => "CreatePolicy",
            Call::DeletePolicy(..) => "DeletePolicy",
            Call::GetCollections(_) => "GetCollections",
            Call::CreateCollection(_) => "CreateCollection",
            Call::ListCollections(_) => "ListCollections",
            Call::DeleteCollection(_) => "DeleteCollection",
            Call::IndexExists(_) => "IndexExists",
            Call::CreateIndex(_) => "CreateIndex",
            Call::ListKnowledgeBases => "ListKnowledgeBases",
            Call::CreateKnowledgeBase(_) => "CreateKnowledgeBase",
            Call::GetKnowledgeBase(_) => "GetKnowledgeBase",
            Call::DeleteKnowledgeBase(_) => "DeleteKnowledgeBase",
            Call::ListDataSources(_) => "ListDataSources",
            Call::CreateDataSource { .. } => "CreateDataSource",
            Call::DeleteDataSource { .. } => "DeleteDataSource",
            Call::StartIngestionJob { .. } => "StartIngestionJob",
            Call::GetIngestionJob(_) => "GetIngestionJob",
            Call::RoleArn(_) => "RoleArn",
            Call::ListBuckets => "ListBuckets",
            Call::ListFoundationModels => "ListFoundationModels",
            Call::InvokeModel(_) => "InvokeModel",
            Call::RetrieveAndGenerate(_) => "RetrieveAndGenerate",
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Call::CreatePolicy(..)
                | Call::CreateCollection(_)
                | Call::CreateIndex(_)
                | Call::CreateKnowledgeBase(_)
                | Call::CreateDataSource { .. }
        )
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Call::DeletePolicy(..)
                | Call::DeleteCollection(_)
                | Call::DeleteKnowledgeBase(_)
                | Call::DeleteDataSource { .. }
        )
    }
}

/// Scripted behaviour of the asynchronous operations.
#[derive(Debug, Clone)]
struct Script {
    collection_polls: u32,
    collection_outcome: CollectionStatus,
    knowledge_base_polls: u32,
    knowledge_base_failures: Vec<String>,
    data_source_failures: Vec<String>,
    ingestion_polls: u32,
    ingestion_outcome: IngestionStatus,
    deletion_polls: u32,
    access_rule_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            collection_polls: 0,
            collection_outcome: CollectionStatus::Active,
            knowledge_base_polls: 0,
            knowledge_base_failures: Vec::new(),
            data_source_failures: Vec::new(),
            ingestion_polls: 0,
            ingestion_outcome: IngestionStatus::Complete,
            deletion_polls: 0,
            access_rule_delay: Duration::ZERO,
        }
    }
}

/// A resource plus the number of lookups left before its status moves on.
#[derive(Debug, Clone)]
struct Tracked<T> {
    value: T,
    pending: u32,
}

impl<T> Tracked<T> {
    fn new(value: T, pending: u32) -> Self {
        Self { value, pending }
    }

    /// Consume one lookup; true once the countdown has run out.
    fn tick(&mut self) -> bool {
        if self.pending == 0 {
            true
        } else {
            self.pending -= 1;
            false
        }
    }
}

#[derive(Debug, Default)]
struct CloudState {
    policies: BTreeMap<(PolicyKind, String), PolicyDetail>,
    collections: Vec<Tracked<Collection>>,
    indexes: BTreeSet<(String, String)>,
    knowledge_bases: Vec<Tracked<KnowledgeBase>>,
    /// Knowledge base id to the ARN of the collection backing it.
    storage: BTreeMap<String, String>,
    data_sources: Vec<Tracked<DataSource>>,
    jobs: Vec<Tracked<IngestionJob>>,
    roles: BTreeMap<String, String>,
    buckets: Vec<String>,
    models: Vec<FoundationModelSummary>,
    script: Script,
    failures: BTreeMap<&'static str, (u16, String)>,
    /// Index calls fail with 403 until then.
    access_rules_enforced_at: Option<Instant>,
    calls: Vec<Call>,
    next_id: u64,
}

impl CloudState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:06}", prefix, self.next_id)
    }

    fn knowledge_base_exists(&self, id: &str) -> bool {
        self.knowledge_bases.iter().any(|kb| kb.value.id == id)
    }

    /// Restart the enforcement clock after an access-relevant change.
    fn access_rules_changed(&mut self) {
        self.access_rules_enforced_at = Some(Instant::now() + self.script.access_rule_delay);
    }

    fn check_index_access(&self, collection: &Collection) -> Result<(), ApiError> {
        let enforced = self.policies.keys().any(|(kind, _)| *kind == PolicyKind::Access)
            && self
                .access_rules_enforced_at
                .map_or(true, |at| Instant::now() >= at);
        if enforced {
            Ok(())
        } else {
            Err(ApiError::service(
                "in-memory",
                403,
                "security_exception",
                format!(
                    "no permissions for index operations on collection '{}'",
                    collection.name
                ),
            ))
        }
    }
}

/// Deterministic stand-in for the AWS services. See the module docs.
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    /// An empty account with a small foundation model catalogue.
    pub fn new() -> Self {
        let models = [
            ("amazon.titan-text-express-v1", "Amazon"),
            ("ai21.j2-ultra-v1", "AI21 Labs"),
            ("anthropic.claude-v2", "Anthropic"),
            ("cohere.command-text-v14", "Cohere"),
            ("meta.llama2-13b-chat-v1", "Meta"),
            ("amazon.titan-embed-text-v1", "Amazon"),
        ]
        .into_iter()
        .map(|(id, provider)| FoundationModelSummary {
            model_id: id.to_string(),
            model_name: None,
            provider_name: Some(provider.to_string()),
        })
        .collect();

        Self {
            state: Mutex::new(CloudState {
                models,
                ..CloudState::default()
            }),
        }
    }

    pub fn with_role(self, name: &str, arn: &str) -> Self {
        self.lock().roles.insert(name.to_string(), arn.to_string());
        self
    }

    pub fn with_bucket(self, name: &str) -> Self {
        self.lock().buckets.push(name.to_string());
        self
    }

    /// Lookups that report `CREATING` before a new collection settles on
    /// `outcome`.
    pub fn with_collection_activation(self, polls: u32, outcome: CollectionStatus) -> Self {
        {
            let mut state = self.lock();
            state.script.collection_polls = polls;
            state.script.collection_outcome = outcome;
        }
        self
    }

    pub fn with_knowledge_base_activation(self, polls: u32) -> Self {
        self.lock().script.knowledge_base_polls = polls;
        self
    }

    /// Failure reasons attached to newly created knowledge bases.
    pub fn with_knowledge_base_failures(self, reasons: &[&str]) -> Self {
        self.lock().script.knowledge_base_failures =
            reasons.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_data_source_failures(self, reasons: &[&str]) -> Self {
        self.lock().script.data_source_failures = reasons.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Lookups that report `IN_PROGRESS` before a job settles on `outcome`.
    pub fn with_ingestion(self, polls: u32, outcome: IngestionStatus) -> Self {
        {
            let mut state = self.lock();
            state.script.ingestion_polls = polls;
            state.script.ingestion_outcome = outcome;
        }
        self
    }

    /// Lookups during which deleted resources are still visible.
    pub fn with_deletion_polls(self, polls: u32) -> Self {
        self.lock().script.deletion_polls = polls;
        self
    }

    /// Time after an access policy or collection is created during which
    /// index calls are refused with 403.
    pub fn with_access_rule_delay(self, delay: Duration) -> Self {
        self.lock().script.access_rule_delay = delay;
        self
    }

    /// Make the next call of `operation` fail with a service error.
    pub fn fail_next(&self, operation: &'static str, status: u16, code: &str) {
        self.lock()
            .failures
            .insert(operation, (status, code.to_string()));
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn policies(&self) -> Vec<(PolicyKind, String)> {
        self.lock().policies.keys().cloned().collect()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.lock()
            .collections
            .iter()
            .map(|c| c.value.name.clone())
            .collect()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.lock().indexes.iter().map(|(_, i)| i.clone()).collect()
    }

    pub fn knowledge_base_names(&self) -> Vec<String> {
        self.lock()
            .knowledge_bases
            .iter()
            .map(|kb| kb.value.name.clone())
            .collect()
    }

    pub fn data_source_ids(&self) -> Vec<String> {
        self.lock()
            .data_sources
            .iter()
            .map(|ds| ds.value.id.clone())
            .collect()
    }

    /// True when no policy, collection, knowledge base, or data source is
    /// left (deleting resources still count).
    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.policies.is_empty()
            && state.collections.is_empty()
            && state.knowledge_bases.is_empty()
            && state.data_sources.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call`, apply any injected failure, and hand out the state.
    fn begin(&self, call: Call) -> Result<MutexGuard<'_, CloudState>, ApiError> {
        let mut state = self.lock();
        let operation = call.operation();
        state.calls.push(call);
        if let Some((status, code)) = state.failures.remove(operation) {
            return Err(ApiError::service(
                "in-memory",
                status,
                code,
                format!("injected failure for {}", operation),
            ));
        }
        Ok(state)
    }
}

fn conflict(message: impl Into<String>) -> ApiError {
    ApiError::service("in-memory", 409, "ConflictException", message)
}

fn validation(message: impl Into<String>) -> ApiError {
    ApiError::service("in-memory", 400, "ValidationException", message)
}

#[async_trait]
impl ResourceApi for InMemoryCloud {
    async fn get_policy(&self, kind: PolicyKind, name: &str) -> Result<PolicyDetail, ApiError> {
        let state = self.begin(Call::GetPolicy(kind, name.to_string()))?;
        state
            .policies
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("{} '{}'", kind, name)))
    }

    async fn create_policy(&self, policy: &SecurityPolicy) -> Result<PolicyDetail, ApiError> {
        let mut state = self.begin(Call::CreatePolicy(policy.kind, policy.name.clone()))?;
        let key = (policy.kind, policy.name.clone());
        if state.policies.contains_key(&key) {
            return Err(conflict(format!("{} '{}' already exists", policy.kind, policy.name)));
        }
        let detail = PolicyDetail {
            name: policy.name.clone(),
            kind: policy.kind,
            policy_version: Some("v1".to_string()),
        };
        state.policies.insert(key, detail.clone());
        if policy.kind == PolicyKind::Access {
            state.access_rules_changed();
        }
        Ok(detail)
    }

    async fn delete_policy(&self, kind: PolicyKind, name: &str) -> Result<(), ApiError> {
        let mut state = self.begin(Call::DeletePolicy(kind, name.to_string()))?;
        state
            .policies
            .remove(&(kind, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found(format!("{} '{}'", kind, name)))
    }

    async fn get_collections(&self, name: &str) -> Result<Vec<Collection>, ApiError> {
        let mut state = self.begin(Call::GetCollections(name.to_string()))?;
        let outcome = state.script.collection_outcome.clone();
        let mut found = Vec::new();
        for tracked in state.collections.iter_mut().filter(|c| c.value.name == name) {
            if tracked.value.status == CollectionStatus::Creating && tracked.tick() {
                tracked.value.status = outcome.clone();
            }
            found.push(tracked.value.clone());
        }
        Ok(found)
    }

    async fn create_collection(&self, request: &CollectionRequest) -> Result<Collection, ApiError> {
        let mut state = self.begin(Call::CreateCollection(request.name.clone()))?;
        if state.collections.iter().any(|c| c.value.name == request.name) {
            return Err(conflict(format!("collection '{}' already exists", request.name)));
        }
        if !state
            .policies
            .keys()
            .any(|(kind, _)| *kind == PolicyKind::Encryption)
        {
            return Err(validation(format!(
                "no matching encryption policy for collection '{}'",
                request.name
            )));
        }
        let id = state.next_id("col").to_lowercase();
        let collection = Collection {
            arn: format!("arn:aws:aoss:{}:{}:collection/{}", REGION, ACCOUNT, id),
            endpoint: Some(format!("https://{}.{}.aoss.amazonaws.com", id, REGION)),
            id,
            name: request.name.clone(),
            status: CollectionStatus::Creating,
        };
        let polls = state.script.collection_polls;
        state.collections.push(Tracked::new(collection.clone(), polls));
        state.access_rules_changed();
        Ok(Collection {
            endpoint: None,
            ..collection
        })
    }

    async fn list_collections(&self, name: &str) -> Result<Vec<Collection>, ApiError> {
        let mut state = self.begin(Call::ListCollections(name.to_string()))?;
        let mut listed = Vec::new();
        state.collections.retain_mut(|tracked| {
            if tracked.value.name != name {
                return true;
            }
            if tracked.value.status == CollectionStatus::Deleting && tracked.tick() {
                return false;
            }
            listed.push(Collection {
                endpoint: None,
                ..tracked.value.clone()
            });
            true
        });
        Ok(listed)
    }

    async fn delete_collection(&self, id: &str) -> Result<Collection, ApiError> {
        let mut state = self.begin(Call::DeleteCollection(id.to_string()))?;
        let arn = match state.collections.iter().find(|c| c.value.id == id) {
            Some(c) => c.value.arn.clone(),
            None => return Err(ApiError::not_found(format!("collection '{}'", id))),
        };
        let in_use = state
            .knowledge_bases
            .iter()
            .any(|kb| state.storage.get(&kb.value.id) == Some(&arn));
        if in_use {
            return Err(conflict(format!("collection '{}' is in use by a knowledge base", id)));
        }
        let polls = state.script.deletion_polls;
        state.indexes.retain(|(collection_id, _)| collection_id != id);
        let mut deleted = None;
        if let Some(tracked) = state.collections.iter_mut().find(|c| c.value.id == id) {
            tracked.value.status = CollectionStatus::Deleting;
            tracked.pending = polls;
            deleted = Some(tracked.value.clone());
        }
        deleted.ok_or_else(|| ApiError::not_found(format!("collection '{}'", id)))
    }

    async fn index_exists(&self, collection: &Collection, index: &str) -> Result<bool, ApiError> {
        let state = self.begin(Call::IndexExists(index.to_string()))?;
        state.check_index_access(collection)?;
        Ok(state
            .indexes
            .contains(&(collection.id.clone(), index.to_string())))
    }

    async fn create_index(
        &self,
        collection: &Collection,
        spec: &VectorIndexSpec,
    ) -> Result<Value, ApiError> {
        let mut state = self.begin(Call::CreateIndex(spec.name.clone()))?;
        let active = state
            .collections
            .iter()
            .any(|c| c.value.id == collection.id && c.value.status == CollectionStatus::Active);
        if !active {
            return Err(validation(format!("collection '{}' is not active", collection.name)));
        }
        state.check_index_access(collection)?;
        let key = (collection.id.clone(), spec.name.clone());
        if !state.indexes.insert(key) {
            return Err(ApiError::service(
                "in-memory",
                400,
                "resource_already_exists_exception",
                format!("index [{}] already exists", spec.name),
            ));
        }
        Ok(json!({ "acknowledged": true, "shards_acknowledged": true, "index": spec.name }))
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseSummary>, ApiError> {
        let state = self.begin(Call::ListKnowledgeBases)?;
        Ok(state
            .knowledge_bases
            .iter()
            .map(|kb| KnowledgeBaseSummary {
                id: kb.value.id.clone(),
                name: kb.value.name.clone(),
                status: kb.value.status.clone(),
            })
            .collect())
    }

    async fn create_knowledge_base(
        &self,
        request: &KnowledgeBaseRequest,
    ) -> Result<KnowledgeBase, ApiError> {
        let mut state = self.begin(Call::CreateKnowledgeBase(request.name.clone()))?;
        if state.knowledge_bases.iter().any(|kb| kb.value.name == request.name) {
            return Err(conflict(format!("knowledge base '{}' already exists", request.name)));
        }
        if !state
            .collections
            .iter()
            .any(|c| c.value.arn == request.collection_arn)
        {
            return Err(validation(format!(
                "collection '{}' does not exist",
                request.collection_arn
            )));
        }
        let id = state.next_id("KB");
        let polls = state.script.knowledge_base_polls;
        let kb = KnowledgeBase {
            arn: format!("arn:aws:bedrock:{}:{}:knowledge-base/{}", REGION, ACCOUNT, id),
            id,
            name: request.name.clone(),
            status: if polls == 0 {
                KnowledgeBaseStatus::Active
            } else {
                KnowledgeBaseStatus::Creating
            },
            failure_reasons: state.script.knowledge_base_failures.clone(),
        };
        state
            .storage
            .insert(kb.id.clone(), request.collection_arn.clone());
        state.knowledge_bases.push(Tracked::new(kb.clone(), polls));
        Ok(kb)
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<KnowledgeBase, ApiError> {
        let mut state = self.begin(Call::GetKnowledgeBase(id.to_string()))?;
        let position = state
            .knowledge_bases
            .iter()
            .position(|kb| kb.value.id == id)
            .ok_or_else(|| ApiError::not_found(format!("knowledge base '{}'", id)))?;

        let tracked = &mut state.knowledge_bases[position];
        match tracked.value.status {
            KnowledgeBaseStatus::Creating => {
                if tracked.tick() {
                    tracked.value.status = KnowledgeBaseStatus::Active;
                }
            }
            KnowledgeBaseStatus::Deleting => {
                if tracked.tick() {
                    state.knowledge_bases.remove(position);
                    state.storage.remove(id);
                    return Err(ApiError::not_found(format!("knowledge base '{}'", id)));
                }
            }
            _ => {}
        }
        Ok(state.knowledge_bases[position].value.clone())
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<KnowledgeBaseStatus, ApiError> {
        let mut state = self.begin(Call::DeleteKnowledgeBase(id.to_string()))?;
        if !state.knowledge_base_exists(id) {
            return Err(ApiError::not_found(format!("knowledge base '{}'", id)));
        }
        if state
            .data_sources
            .iter()
            .any(|ds| ds.value.knowledge_base_id == id)
        {
            return Err(validation(format!(
                "knowledge base '{}' still has data sources",
                id
            )));
        }
        let polls = state.script.deletion_polls;
        if let Some(kb) = state.knowledge_bases.iter_mut().find(|kb| kb.value.id == id) {
            kb.value.status = KnowledgeBaseStatus::Deleting;
            kb.pending = polls;
        }
        Ok(KnowledgeBaseStatus::Deleting)
    }

    async fn list_data_sources(
        &self,
        knowledge_base_id: &str,
    ) -> Result<Vec<DataSourceSummary>, ApiError> {
        let mut state = self.begin(Call::ListDataSources(knowledge_base_id.to_string()))?;
        if !state.knowledge_base_exists(knowledge_base_id) {
            return Err(ApiError::not_found(format!(
                "knowledge base '{}'",
                knowledge_base_id
            )));
        }
        let mut listed = Vec::new();
        state.data_sources.retain_mut(|tracked| {
            if tracked.value.knowledge_base_id != knowledge_base_id {
                return true;
            }
            if tracked.value.status == DataSourceStatus::Deleting && tracked.tick() {
                return false;
            }
            listed.push(DataSourceSummary {
                id: tracked.value.id.clone(),
                name: tracked.value.name.clone(),
                knowledge_base_id: tracked.value.knowledge_base_id.clone(),
                status: tracked.value.status.clone(),
            });
            true
        });
        Ok(listed)
    }

    async fn create_data_source(
        &self,
        request: &DataSourceRequest,
    ) -> Result<DataSource, ApiError> {
        let mut state = self.begin(Call::CreateDataSource {
            knowledge_base_id: request.knowledge_base_id.clone(),
            name: request.name.clone(),
        })?;
        if !state.knowledge_base_exists(&request.knowledge_base_id) {
            return Err(ApiError::not_found(format!(
                "knowledge base '{}'",
                request.knowledge_base_id
            )));
        }
        let id = state.next_id("DS");
        let ds = DataSource {
            id,
            name: request.name.clone(),
            knowledge_base_id: request.knowledge_base_id.clone(),
            status: DataSourceStatus::Available,
            failure_reasons: state.script.data_source_failures.clone(),
        };
        state.data_sources.push(Tracked::new(ds.clone(), 0));
        Ok(ds)
    }

    async fn delete_data_source(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> Result<DataSourceStatus, ApiError> {
        let mut state = self.begin(Call::DeleteDataSource {
            knowledge_base_id: knowledge_base_id.to_string(),
            data_source_id: data_source_id.to_string(),
        })?;
        let polls = state.script.deletion_polls;
        let ds = state
            .data_sources
            .iter_mut()
            .find(|ds| ds.value.id == data_source_id && ds.value.knowledge_base_id == knowledge_base_id)
            .ok_or_else(|| ApiError::not_found(format!("data source '{}'", data_source_id)))?;
        ds.value.status = DataSourceStatus::Deleting;
        ds.pending = polls;
        Ok(DataSourceStatus::Deleting)
    }

    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        _description: &str,
    ) -> Result<IngestionJob, ApiError> {
        let mut state = self.begin(Call::StartIngestionJob {
            knowledge_base_id: knowledge_base_id.to_string(),
            data_source_id: data_source_id.to_string(),
        })?;
        if !state
            .data_sources
            .iter()
            .any(|ds| ds.value.id == data_source_id && ds.value.knowledge_base_id == knowledge_base_id)
        {
            return Err(ApiError::not_found(format!("data source '{}'", data_source_id)));
        }
        let job = IngestionJob {
            id: state.next_id("JOB"),
            knowledge_base_id: knowledge_base_id.to_string(),
            data_source_id: data_source_id.to_string(),
            status: IngestionStatus::Starting,
            failure_reasons: Vec::new(),
            statistics: None,
        };
        let polls = state.script.ingestion_polls;
        state.jobs.push(Tracked::new(job.clone(), polls));
        Ok(job)
    }

    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        ingestion_job_id: &str,
    ) -> Result<IngestionJob, ApiError> {
        let mut state = self.begin(Call::GetIngestionJob(ingestion_job_id.to_string()))?;
        let outcome = state.script.ingestion_outcome.clone();
        let tracked = state
            .jobs
            .iter_mut()
            .find(|j| {
                j.value.id == ingestion_job_id
                    && j.value.knowledge_base_id == knowledge_base_id
                    && j.value.data_source_id == data_source_id
            })
            .ok_or_else(|| ApiError::not_found(format!("ingestion job '{}'", ingestion_job_id)))?;
        if tracked.tick() {
            tracked.value.status = outcome;
            if tracked.value.status == IngestionStatus::Complete {
                tracked.value.statistics = Some(json!({ "numberOfDocumentsScanned": 3 }));
            }
        } else {
            tracked.value.status = IngestionStatus::InProgress;
        }
        Ok(tracked.value.clone())
    }
}

#[async_trait]
impl AccountApi for InMemoryCloud {
    async fn role_arn(&self, role_name: &str) -> Result<String, ApiError> {
        let state = self.begin(Call::RoleArn(role_name.to_string()))?;
        state
            .roles
            .get(role_name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("role '{}'", role_name)))
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ApiError> {
        let state = self.begin(Call::ListBuckets)?;
        Ok(state.buckets.clone())
    }
}

#[async_trait]
impl ModelApi for InMemoryCloud {
    async fn list_foundation_models(&self) -> Result<Vec<FoundationModelSummary>, ApiError> {
        let state = self.begin(Call::ListFoundationModels)?;
        Ok(state.models.clone())
    }

    /// Echo the prompt back in the response shape of the model's family.
    async fn invoke_model(&self, model_id: &str, body: &Value) -> Result<Value, ApiError> {
        let _state = self.begin(Call::InvokeModel(model_id.to_string()))?;
        let family = ModelFamily::from_model_id(model_id)
            .map_err(|e| validation(e.to_string()))?;
        let prompt = body
            .get("prompt")
            .or_else(|| body.get("inputText"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let text = format!("echo: {}", prompt);
        Ok(match family {
            ModelFamily::TitanText => json!({ "results": [{ "outputText": text }] }),
            ModelFamily::Jurassic2 => json!({ "completions": [{ "data": { "text": text } }] }),
            ModelFamily::Claude => json!({ "completion": text }),
            ModelFamily::CohereCommand => json!({ "generations": [{ "text": text }] }),
            ModelFamily::Llama2 => json!({ "generation": text }),
        })
    }

    async fn retrieve_and_generate(&self, request: &RagRequest) -> Result<RagAnswer, ApiError> {
        let state = self.begin(Call::RetrieveAndGenerate(request.knowledge_base_id.clone()))?;
        if !state.knowledge_base_exists(&request.knowledge_base_id) {
            return Err(ApiError::not_found(format!(
                "knowledge base '{}'",
                request.knowledge_base_id
            )));
        }
        let sources = state
            .buckets
            .first()
            .map(|b| vec![format!("s3://{}/handbook.md", b)])
            .unwrap_or_default();
        Ok(RagAnswer {
            text: format!("answer to: {}", request.prompt),
            session_id: Some("session-1".to_string()),
            sources,
        })
    }
}
