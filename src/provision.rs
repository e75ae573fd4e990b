//! Provisioning orchestrator.
//!
//! Builds the RAG stack in dependency order, skipping whatever already
//! exists:
//!
//! ```text
//! policies (access, encryption, network)
//!   └─▶ collection ──poll ACTIVE──▶ vector index (settle delays)
//!         └─▶ knowledge base ──poll ACTIVE──▶ data source
//!               └─▶ ingestion job ──poll COMPLETE
//! ```
//!
//! Every step is awaited before the next one starts. Any API error, wait
//! failure, or (under the default `abort` policy) service-reported create
//! failure stops the run; nothing created so far is rolled back, and a
//! re-run resumes where this one stopped.

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FailurePolicy};
use crate::context::DeployContext;
use crate::ensure::{ensure, find_collection, find_knowledge_base, policy_exists, Ensured};
use crate::error::OrchestrationError;
use crate::models::{
    Collection, CollectionStatus, DataSourceSummary, IngestionJob, IngestionStatus, KnowledgeBase,
    KnowledgeBaseStatus, KnowledgeBaseSummary, PolicyKind, ResourceKind, ResourceRef,
};
use crate::poll::wait_for_unless;
use crate::traits::{AccountApi, ResourceApi};

/// What a provisioning run found, created, and ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionReport {
    pub created: Vec<ResourceRef>,
    pub existing: Vec<ResourceRef>,
    pub collection: Collection,
    pub knowledge_base_id: String,
    pub data_source_id: String,
    pub ingestion: IngestionJob,
}

/// Accumulates created/existing entries as the run progresses.
#[derive(Default)]
struct Ledger {
    created: Vec<ResourceRef>,
    existing: Vec<ResourceRef>,
}

impl Ledger {
    fn record<T>(&mut self, kind: ResourceKind, name: &str, outcome: &Ensured<T>) {
        let entry = ResourceRef::new(kind, name);
        if outcome.was_created() {
            self.created.push(entry);
        } else {
            self.existing.push(entry);
        }
    }

    fn created_any(&self, kinds: &[ResourceKind]) -> bool {
        self.created.iter().any(|r| kinds.contains(&r.kind))
    }
}

/// Run the full provisioning sequence against `api`.
pub async fn provision(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
) -> Result<ProvisionReport, OrchestrationError> {
    debug!(context = %ctx.describe(), "Provisioning with resolved context");
    let mut ledger = Ledger::default();

    ensure_policies(ctx, api, &mut ledger).await?;
    let collection = ensure_collection(ctx, api, &mut ledger).await?;
    let fresh_access = ledger.created_any(&[
        ResourceKind::Policy(PolicyKind::Access),
        ResourceKind::Collection,
    ]);
    ensure_index(ctx, api, &collection, fresh_access, &mut ledger).await?;
    let knowledge_base_id = ensure_knowledge_base(ctx, api, &collection, &mut ledger).await?;
    let data_source_id = ensure_data_source(ctx, api, &knowledge_base_id, &mut ledger).await?;
    let ingestion = ingest(ctx, api, &knowledge_base_id, &data_source_id).await?;

    info!(
        created = ledger.created.len(),
        existing = ledger.existing.len(),
        "Provisioning complete"
    );
    Ok(ProvisionReport {
        created: ledger.created,
        existing: ledger.existing,
        collection,
        knowledge_base_id,
        data_source_id,
        ingestion,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Steps
// ═══════════════════════════════════════════════════════════════════════

async fn ensure_policies(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    ledger: &mut Ledger,
) -> Result<(), OrchestrationError> {
    info!("Creating OpenSearch security policies...");
    for kind in PolicyKind::ALL {
        let name = ctx.policy_name.as_str();
        let outcome = ensure(
            kind.label(),
            name,
            async move {
                let exists = policy_exists(api, kind, name).await?;
                Ok::<_, OrchestrationError>(exists.then_some(()))
            },
            || async move {
                let detail = api.create_policy(&ctx.policy(kind)).await?;
                info!(%kind, name = %detail.name, "Created OpenSearch policy");
                Ok::<_, OrchestrationError>(())
            },
        )
        .await?;
        ledger.record(ResourceKind::Policy(kind), name, &outcome);
    }
    Ok(())
}

async fn ensure_collection(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    ledger: &mut Ledger,
) -> Result<Collection, OrchestrationError> {
    let name = ctx.collection_name.as_str();
    info!(name, "Creating OpenSearch Serverless collection...");

    let outcome = ensure(
        "collection",
        name,
        find_collection(api, name),
        || async move { api.create_collection(&ctx.collection_request()).await },
    )
    .await?;
    ledger.record(ResourceKind::Collection, name, &outcome);

    let mut collection = outcome.into_inner();
    if collection.status != CollectionStatus::Active {
        wait_for_unless(
            &ctx.collection_poll_spec(),
            || api.get_collections(name),
            |collections: &Vec<Collection>| {
                collections
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| c.status.clone())
            },
            &Some(CollectionStatus::Active),
            |status: &Option<CollectionStatus>| {
                matches!(
                    status,
                    None | Some(CollectionStatus::Failed) | Some(CollectionStatus::Deleting)
                )
            },
        )
        .await?;
        collection = find_collection(api, name)
            .await?
            .ok_or_else(|| OrchestrationError::CollectionVanished {
                name: name.to_string(),
            })?;
    }

    if collection.host().is_none() {
        return Err(OrchestrationError::MissingEndpoint {
            name: name.to_string(),
        });
    }
    info!(endpoint = ?collection.endpoint, arn = %collection.arn, "Collection is active");
    Ok(collection)
}

/// Index calls are rejected until the data access rules covering the
/// collection are enforced, so a run that just created the access policy or
/// the collection waits out `access_rule_settle` before the existence check.
async fn ensure_index(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    collection: &Collection,
    fresh_access: bool,
    ledger: &mut Ledger,
) -> Result<(), OrchestrationError> {
    let name = ctx.index.name.as_str();
    if fresh_access {
        settle_access_rules(ctx).await;
    }
    let outcome = ensure(
        "index",
        name,
        async move {
            let exists = api.index_exists(collection, name).await?;
            Ok::<_, OrchestrationError>(exists.then_some(()))
        },
        || async move {
            if !fresh_access {
                settle_access_rules(ctx).await;
            }

            let response = api.create_index(collection, &ctx.index).await?;
            info!(%response, "Index response");

            info!(delay_secs = ctx.index_settle.as_secs(), "Waiting for index to be created...");
            sleep(ctx.index_settle).await;
            Ok::<_, OrchestrationError>(())
        },
    )
    .await?;
    ledger.record(ResourceKind::Index, name, &outcome);
    Ok(())
}

async fn settle_access_rules(ctx: &DeployContext) {
    info!(
        delay_secs = ctx.access_rule_settle.as_secs(),
        "Waiting for data access rules to be enforced..."
    );
    sleep(ctx.access_rule_settle).await;
}

async fn ensure_knowledge_base(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    collection: &Collection,
    ledger: &mut Ledger,
) -> Result<String, OrchestrationError> {
    let name = ctx.kb_name.as_str();
    let outcome = ensure(
        "knowledge base",
        name,
        async move { Ok::<_, OrchestrationError>(find_knowledge_base(api, name).await?) },
        || async move {
            let request = ctx.knowledge_base_request(&collection.arn);
            let kb = api.create_knowledge_base(&request).await?;
            check_failure_reasons(ctx, ResourceKind::KnowledgeBase, &kb.name, &kb.failure_reasons)?;
            Ok::<_, OrchestrationError>(KnowledgeBaseSummary {
                id: kb.id,
                name: kb.name,
                status: kb.status,
            })
        },
    )
    .await?;
    ledger.record(ResourceKind::KnowledgeBase, name, &outcome);

    let kb = outcome.into_inner();
    info!(id = %kb.id, status = ?kb.status, "Knowledge Base ID");

    if kb.status != KnowledgeBaseStatus::Active {
        let id = kb.id.as_str();
        wait_for_unless(
            &ctx.poll_spec(&format!("knowledge base '{}' activation", name)),
            || api.get_knowledge_base(id),
            |kb: &KnowledgeBase| kb.status.clone(),
            &KnowledgeBaseStatus::Active,
            |status: &KnowledgeBaseStatus| {
                matches!(
                    status,
                    KnowledgeBaseStatus::Failed
                        | KnowledgeBaseStatus::Deleting
                        | KnowledgeBaseStatus::DeleteUnsuccessful
                )
            },
        )
        .await?;
    }
    Ok(kb.id)
}

/// Reuse the first data source under the knowledge base, or create one.
async fn ensure_data_source(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    knowledge_base_id: &str,
    ledger: &mut Ledger,
) -> Result<String, OrchestrationError> {
    let outcome = ensure(
        "data source",
        knowledge_base_id,
        async move {
            let sources = api.list_data_sources(knowledge_base_id).await?;
            Ok::<_, OrchestrationError>(sources.into_iter().next())
        },
        || async move {
            let request = ctx.data_source_request(knowledge_base_id);
            let ds = api.create_data_source(&request).await?;
            check_failure_reasons(ctx, ResourceKind::DataSource, &ds.name, &ds.failure_reasons)?;
            Ok::<_, OrchestrationError>(DataSourceSummary {
                id: ds.id,
                name: ds.name,
                knowledge_base_id: ds.knowledge_base_id,
                status: ds.status,
            })
        },
    )
    .await?;
    let ds: &DataSourceSummary = outcome.get();
    ledger.record(ResourceKind::DataSource, &ds.name, &outcome);
    info!(id = %ds.id, name = %ds.name, "Data source ID");
    Ok(outcome.into_inner().id)
}

async fn ingest(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    knowledge_base_id: &str,
    data_source_id: &str,
) -> Result<IngestionJob, OrchestrationError> {
    let job = api
        .start_ingestion_job(knowledge_base_id, data_source_id, "Syncing S3 data source")
        .await?;
    info!(id = %job.id, status = ?job.status, "Ingestion job started");

    let job_id = job.id.as_str();
    let status = wait_for_unless(
        &ctx.poll_spec("ingestion job"),
        || api.get_ingestion_job(knowledge_base_id, data_source_id, job_id),
        |job: &IngestionJob| job.status.clone(),
        &IngestionStatus::Complete,
        IngestionStatus::is_failure,
    )
    .await?;

    Ok(IngestionJob {
        status,
        ..job
    })
}

/// Apply the configured policy to failure reasons attached to a new resource.
fn check_failure_reasons(
    ctx: &DeployContext,
    kind: ResourceKind,
    name: &str,
    reasons: &[String],
) -> Result<(), OrchestrationError> {
    if reasons.is_empty() {
        return Ok(());
    }
    match ctx.on_create_failure {
        FailurePolicy::Abort => {
            error!(%kind, name, ?reasons, "Create call reported failure reasons");
            Err(OrchestrationError::CreateFailed {
                kind: kind.to_string(),
                name: name.to_string(),
                reasons: reasons.to_vec(),
            })
        }
        FailurePolicy::Warn => {
            warn!(%kind, name, ?reasons, "Create call reported failure reasons, continuing");
            Ok(())
        }
    }
}

/// Run the provision command: resolve the account context, build the stack,
/// and print a summary.
pub async fn run_provision<A>(config: &Config, api: &A) -> anyhow::Result<()>
where
    A: ResourceApi + AccountApi,
{
    let ctx = DeployContext::resolve(config, api).await?;
    let report = provision(&ctx, api).await?;

    println!("Knowledge base '{}' is ready", ctx.kb_name);
    println!();
    println!("  Knowledge base ID:  {}", report.knowledge_base_id);
    println!("  Data source ID:     {}", report.data_source_id);
    println!(
        "  Collection:         {} ({})",
        report.collection.name,
        report.collection.endpoint.as_deref().unwrap_or("-")
    );
    println!(
        "  Ingestion job:      {} {:?}",
        report.ingestion.id, report.ingestion.status
    );
    println!();
    println!("  Created:  {}", report.created.len());
    for entry in &report.created {
        println!("    + {}", entry);
    }
    println!("  Existing: {}", report.existing.len());
    for entry in &report.existing {
        println!("    = {}", entry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(policy: FailurePolicy) -> DeployContext {
        let mut cfg = Config::default();
        cfg.orchestration.on_create_failure = policy;
        DeployContext::with_resolved(&cfg, "arn:aws:iam::1:role/kb".into(), "bucket".into())
    }

    #[test]
    fn no_reasons_passes_under_both_policies() {
        for policy in [FailurePolicy::Abort, FailurePolicy::Warn] {
            assert!(check_failure_reasons(&ctx(policy), ResourceKind::DataSource, "ds", &[]).is_ok());
        }
    }

    #[test]
    fn reasons_abort_or_warn() {
        let reasons = vec!["bucket not accessible".to_string()];
        let err = check_failure_reasons(
            &ctx(FailurePolicy::Abort),
            ResourceKind::DataSource,
            "demo-rag-data-source",
            &reasons,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "data source 'demo-rag-data-source' reported failure: bucket not accessible"
        );
        assert!(check_failure_reasons(
            &ctx(FailurePolicy::Warn),
            ResourceKind::DataSource,
            "demo-rag-data-source",
            &reasons
        )
        .is_ok());
    }

    #[test]
    fn ledger_splits_created_and_existing() {
        let mut ledger = Ledger::default();
        ledger.record(ResourceKind::Index, "idx", &Ensured::Created(()));
        ledger.record(ResourceKind::Collection, "c", &Ensured::Existing(()));
        assert_eq!(ledger.created, vec![ResourceRef::new(ResourceKind::Index, "idx")]);
        assert_eq!(ledger.existing, vec![ResourceRef::new(ResourceKind::Collection, "c")]);
    }
}
