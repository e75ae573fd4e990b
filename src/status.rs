//! Read-only overview of the provisioned stack.
//!
//! `kbh status` looks up every resource the orchestrators manage, by the
//! names derived from the configuration, and prints one row per resource.
//! Nothing is created or deleted and no account lookups (role, bucket) are
//! made, so the command works with read-only credentials.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::ensure::{find_collection, find_knowledge_base, policy_exists};
use crate::error::ApiError;
use crate::models::{CollectionStatus, PolicyKind, ResourceKind};
use crate::traits::ResourceApi;

/// One line of the status table.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    pub kind: ResourceKind,
    pub name: String,
    /// Service status, `PRESENT` for resources without one, `MISSING` when
    /// the lookup found nothing.
    pub state: String,
    /// Id or endpoint, when known.
    pub detail: Option<String>,
}

impl StatusRow {
    fn new(kind: ResourceKind, name: &str, state: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            state: state.into(),
            detail,
        }
    }

    fn missing(kind: ResourceKind, name: &str) -> Self {
        Self::new(kind, name, "MISSING", None)
    }
}

/// Look up every managed resource, in provisioning order.
///
/// The index is only checked on an `ACTIVE` collection with an endpoint;
/// data sources only under an existing knowledge base.
pub async fn inspect(config: &Config, api: &dyn ResourceApi) -> Result<Vec<StatusRow>, ApiError> {
    let mut rows = Vec::new();

    let policy_name = config.vector_store.policy_name.as_str();
    for kind in PolicyKind::ALL {
        let row = if policy_exists(api, kind, policy_name).await? {
            StatusRow::new(ResourceKind::Policy(kind), policy_name, "PRESENT", None)
        } else {
            StatusRow::missing(ResourceKind::Policy(kind), policy_name)
        };
        rows.push(row);
    }

    let collection_name = config.collection_name();
    let index_name = config.index_name();
    match find_collection(api, &collection_name).await? {
        Some(collection) => {
            rows.push(StatusRow::new(
                ResourceKind::Collection,
                &collection_name,
                wire_name(&collection.status),
                collection.endpoint.clone().or(Some(collection.id.clone())),
            ));
            if collection.status == CollectionStatus::Active && collection.endpoint.is_some() {
                let row = if api.index_exists(&collection, &index_name).await? {
                    StatusRow::new(ResourceKind::Index, &index_name, "PRESENT", None)
                } else {
                    StatusRow::missing(ResourceKind::Index, &index_name)
                };
                rows.push(row);
            } else {
                rows.push(StatusRow::new(ResourceKind::Index, &index_name, "UNKNOWN", None));
            }
        }
        None => {
            rows.push(StatusRow::missing(ResourceKind::Collection, &collection_name));
            rows.push(StatusRow::missing(ResourceKind::Index, &index_name));
        }
    }

    let kb_name = config.knowledge_base.name.as_str();
    match find_knowledge_base(api, kb_name).await? {
        Some(kb) => {
            rows.push(StatusRow::new(
                ResourceKind::KnowledgeBase,
                kb_name,
                wire_name(&kb.status),
                Some(kb.id.clone()),
            ));
            let sources = api.list_data_sources(&kb.id).await?;
            if sources.is_empty() {
                rows.push(StatusRow::missing(ResourceKind::DataSource, &config.data_source_name()));
            }
            for source in sources {
                rows.push(StatusRow::new(
                    ResourceKind::DataSource,
                    &source.name,
                    wire_name(&source.status),
                    Some(source.id),
                ));
            }
        }
        None => {
            rows.push(StatusRow::missing(ResourceKind::KnowledgeBase, kb_name));
            rows.push(StatusRow::missing(ResourceKind::DataSource, &config.data_source_name()));
        }
    }

    Ok(rows)
}

/// Run the status command: inspect and print a table.
pub async fn run_status(config: &Config, api: &dyn ResourceApi) -> Result<()> {
    let rows = inspect(config, api).await?;

    println!("{:<18} {:<44} {:<20} DETAIL", "RESOURCE", "NAME", "STATUS");
    for row in &rows {
        println!(
            "{:<18} {:<44} {:<20} {}",
            row.kind.to_string(),
            row.name,
            row.state,
            row.detail.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Status as the service spells it (`ACTIVE`, `DELETE_UNSUCCESSFUL`, ...).
fn wire_name<T: Serialize>(status: &T) -> String {
    match serde_json::to_value(status) {
        Ok(serde_json::Value::String(s)) => s,
        _ => "UNKNOWN".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeployContext;
    use crate::memory::InMemoryCloud;
    use crate::models::KnowledgeBaseStatus;
    use crate::provision::provision;

    fn states(rows: &[StatusRow]) -> Vec<(String, String)> {
        rows.iter()
            .map(|r| (r.kind.to_string(), r.state.clone()))
            .collect()
    }

    #[test]
    fn wire_names_match_the_service() {
        assert_eq!(wire_name(&KnowledgeBaseStatus::DeleteUnsuccessful), "DELETE_UNSUCCESSFUL");
        assert_eq!(wire_name(&CollectionStatus::Active), "ACTIVE");
    }

    #[tokio::test]
    async fn empty_account_reports_everything_missing() {
        let cloud = InMemoryCloud::new();
        let rows = inspect(&Config::default(), &cloud).await.unwrap();
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|r| r.state == "MISSING"));
        assert!(cloud.calls().iter().all(|c| !c.is_create() && !c.is_delete()));
    }

    #[tokio::test(start_paused = true)]
    async fn provisioned_stack_reports_ids_and_statuses() {
        let config = Config::default();
        let cloud = InMemoryCloud::new();
        let ctx = DeployContext::with_resolved(&config, "arn:aws:iam::1:role/kb".into(), "docs".into());
        let report = provision(&ctx, &cloud).await.unwrap();

        let rows = inspect(&config, &cloud).await.unwrap();
        assert_eq!(
            states(&rows),
            vec![
                ("access policy".to_string(), "PRESENT".to_string()),
                ("encryption policy".to_string(), "PRESENT".to_string()),
                ("network policy".to_string(), "PRESENT".to_string()),
                ("collection".to_string(), "ACTIVE".to_string()),
                ("index".to_string(), "PRESENT".to_string()),
                ("knowledge base".to_string(), "ACTIVE".to_string()),
                ("data source".to_string(), "AVAILABLE".to_string()),
            ]
        );
        assert_eq!(rows[5].detail.as_deref(), Some(report.knowledge_base_id.as_str()));
        assert_eq!(rows[6].detail.as_deref(), Some(report.data_source_id.as_str()));
        assert_eq!(rows[3].detail, report.collection.endpoint);
    }
}
