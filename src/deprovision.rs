//! Deprovisioning orchestrator.
//!
//! Tears the stack down children first, confirming each deletion before
//! touching the parent:
//!
//! 1. knowledge base: delete its data sources, wait for the listing to
//!    empty, delete the knowledge base, wait until it is not found;
//! 2. collection: delete by id, wait for the name-filtered listing to empty;
//! 3. policies: delete each of access, encryption, network if present.
//!
//! Anything already gone is logged and skipped, so an interrupted run can be
//! repeated. Resources already in `DELETING` are not deleted again; the run
//! only waits for them.

use tracing::info;

use crate::config::Config;
use crate::context::DeployContext;
use crate::ensure::{find_collection, find_knowledge_base, policy_exists, remove_if_present, Removed};
use crate::error::OrchestrationError;
use crate::models::{
    Collection, CollectionStatus, DataSourceStatus, DataSourceSummary, KnowledgeBase,
    KnowledgeBaseStatus, KnowledgeBaseSummary, PolicyKind, ResourceKind, ResourceRef,
};
use crate::poll::{wait_for, wait_until_gone};
use crate::traits::ResourceApi;

/// Resources removed and skipped, each in the order they were handled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeprovisionReport {
    pub deleted: Vec<ResourceRef>,
    pub skipped: Vec<ResourceRef>,
}

impl DeprovisionReport {
    fn skip(&mut self, kind: ResourceKind, name: &str) {
        self.skipped.push(ResourceRef::new(kind, name));
    }

    fn delete(&mut self, kind: ResourceKind, name: &str) {
        self.deleted.push(ResourceRef::new(kind, name));
    }
}

/// Run the full teardown sequence against `api`.
pub async fn deprovision(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
) -> Result<DeprovisionReport, OrchestrationError> {
    info!("Cleaning up Amazon Bedrock knowledge base resources...");
    let mut report = DeprovisionReport::default();

    remove_knowledge_base(ctx, api, &mut report).await?;

    info!("Deleting OpenSearch resources...");
    remove_collection(ctx, api, &mut report).await?;
    remove_policies(ctx, api, &mut report).await?;

    info!(
        deleted = report.deleted.len(),
        skipped = report.skipped.len(),
        "Clean up complete"
    );
    Ok(report)
}

async fn remove_knowledge_base(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    report: &mut DeprovisionReport,
) -> Result<(), OrchestrationError> {
    let name = ctx.kb_name.as_str();
    let removed = remove_if_present(
        "knowledge base",
        name,
        async move { Ok::<_, OrchestrationError>(find_knowledge_base(api, name).await?) },
        |kb: KnowledgeBaseSummary| async move {
            let sources = remove_data_sources(ctx, api, &kb.id).await?;
            delete_knowledge_base(ctx, api, &kb).await?;
            Ok::<_, OrchestrationError>(sources)
        },
    )
    .await?;

    match removed {
        Removed::Deleted(sources) => {
            if sources.is_empty() {
                report.skip(ResourceKind::DataSource, &ctx.data_source_name);
            }
            for source in &sources {
                report.delete(ResourceKind::DataSource, &source.name);
            }
            report.delete(ResourceKind::KnowledgeBase, name);
        }
        Removed::Absent => {
            info!(name, "Knowledge base not found... Already deleted");
            report.skip(ResourceKind::DataSource, &ctx.data_source_name);
            report.skip(ResourceKind::KnowledgeBase, name);
        }
    }
    Ok(())
}

/// Delete every data source under the knowledge base and wait until the
/// listing is empty. Returns the data sources that were present.
async fn remove_data_sources(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    knowledge_base_id: &str,
) -> Result<Vec<DataSourceSummary>, OrchestrationError> {
    let sources = api.list_data_sources(knowledge_base_id).await?;
    if sources.is_empty() {
        info!("No knowledge base data sources found... Already deleted");
        return Ok(sources);
    }

    info!(count = sources.len(), "Deleting knowledge base data sources...");
    for source in &sources {
        if source.status == DataSourceStatus::Deleting {
            info!(id = %source.id, name = %source.name, "Data source already deleting");
            continue;
        }
        let status = api.delete_data_source(knowledge_base_id, &source.id).await?;
        info!(id = %source.id, name = %source.name, ?status, "Data source delete requested");
    }

    wait_for(
        &ctx.poll_spec("data source deletion"),
        || api.list_data_sources(knowledge_base_id),
        |listing: &Vec<DataSourceSummary>| listing.len(),
        &0,
    )
    .await?;
    Ok(sources)
}

async fn delete_knowledge_base(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    kb: &KnowledgeBaseSummary,
) -> Result<(), OrchestrationError> {
    info!(id = %kb.id, "Deleting knowledge base...");
    if kb.status != KnowledgeBaseStatus::Deleting {
        let status = api.delete_knowledge_base(&kb.id).await?;
        info!(name = %kb.name, ?status, "Knowledge base delete requested");
    }

    let id = kb.id.as_str();
    wait_until_gone(
        &ctx.poll_spec(&format!("knowledge base '{}' deletion", kb.name)),
        || api.get_knowledge_base(id),
        |current: &KnowledgeBase| current.status.clone(),
        &KnowledgeBaseStatus::Deleting,
    )
    .await?;
    Ok(())
}

async fn remove_collection(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    report: &mut DeprovisionReport,
) -> Result<(), OrchestrationError> {
    let name = ctx.collection_name.as_str();
    let removed = remove_if_present(
        "collection",
        name,
        async move { Ok::<_, OrchestrationError>(find_collection(api, name).await?) },
        |collection: Collection| async move {
            if collection.status != CollectionStatus::Deleting {
                let deleted = api.delete_collection(&collection.id).await?;
                info!(id = %deleted.id, status = ?deleted.status, "OpenSearch collection deleted");
            }
            wait_for(
                &ctx.poll_spec(&format!("collection '{}' deletion", name)),
                || api.list_collections(name),
                |listing: &Vec<Collection>| listing.len(),
                &0,
            )
            .await?;
            Ok::<_, OrchestrationError>(())
        },
    )
    .await?;

    if removed.was_deleted() {
        report.delete(ResourceKind::Collection, name);
    } else {
        report.skip(ResourceKind::Collection, name);
    }
    Ok(())
}

async fn remove_policies(
    ctx: &DeployContext,
    api: &dyn ResourceApi,
    report: &mut DeprovisionReport,
) -> Result<(), OrchestrationError> {
    let name = ctx.policy_name.as_str();
    for kind in PolicyKind::ALL {
        let removed = remove_if_present(
            kind.label(),
            name,
            async move {
                let exists = policy_exists(api, kind, name).await?;
                Ok::<_, OrchestrationError>(exists.then_some(()))
            },
            |()| async move {
                api.delete_policy(kind, name).await?;
                info!(%kind, name, "OpenSearch policy deleted");
                Ok::<_, OrchestrationError>(())
            },
        )
        .await?;

        if removed.was_deleted() {
            report.delete(ResourceKind::Policy(kind), name);
        } else {
            report.skip(ResourceKind::Policy(kind), name);
        }
    }
    Ok(())
}

/// Run the deprovision command and print what was removed.
pub async fn run_deprovision(config: &Config, api: &dyn ResourceApi) -> anyhow::Result<()> {
    let ctx = DeployContext::for_teardown(config);
    let report = deprovision(&ctx, api).await?;

    println!("Knowledge base '{}' removed", ctx.kb_name);
    println!();
    println!("  Deleted: {}", report.deleted.len());
    for entry in &report.deleted {
        println!("    - {}", entry);
    }
    println!("  Skipped: {}", report.skipped.len());
    for entry in &report.skipped {
        println!("    . {} (not found)", entry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, InMemoryCloud};

    fn ctx() -> DeployContext {
        DeployContext::with_resolved(&Config::default(), "arn:aws:iam::1:role/kb".into(), "bucket".into())
    }

    #[tokio::test(start_paused = true)]
    async fn empty_account_skips_everything() {
        let cloud = InMemoryCloud::new();
        let report = deprovision(&ctx(), &cloud).await.unwrap();

        assert!(report.deleted.is_empty());
        let skipped: Vec<String> = report.skipped.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            skipped,
            vec![
                "data source 'demo-rag-data-source'",
                "knowledge base 'demo-rag'",
                "collection 'demo-rag-os-collection'",
                "access policy 'bedrock-security-policy'",
                "encryption policy 'bedrock-security-policy'",
                "network policy 'bedrock-security-policy'",
            ]
        );
        assert!(cloud.calls().iter().all(|c| !c.is_delete()));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_errors_stop_the_run() {
        let cloud = InMemoryCloud::new();
        cloud.fail_next("ListKnowledgeBases", 403, "AccessDeniedException");
        let err = deprovision(&ctx(), &cloud).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Api(_)));
        assert_eq!(cloud.calls(), vec![Call::ListKnowledgeBases]);
    }
}
