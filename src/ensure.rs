//! Idempotent check-then-act helpers.
//!
//! Every resource is keyed by name (or by parent id for children). Before a
//! create the key is looked up; before a delete the key is looked up too.
//! Re-running either orchestrator therefore converges instead of
//! duplicating or failing on already-removed resources.
//!
//! Lookups treat [`ApiError::NotFound`] as "absent"; every other error is
//! returned to the caller unchanged.

use std::future::Future;

use tracing::info;

use crate::error::ApiError;
use crate::models::{Collection, KnowledgeBaseSummary, PolicyKind};
use crate::traits::ResourceApi;

/// Result of [`ensure`]: the resource already existed or was just created.
#[derive(Debug, Clone, PartialEq)]
pub enum Ensured<T> {
    Existing(T),
    Created(T),
}

impl<T> Ensured<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Ensured::Existing(v) | Ensured::Created(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Ensured::Existing(v) | Ensured::Created(v) => v,
        }
    }
}

/// Result of [`remove_if_present`].
#[derive(Debug, Clone, PartialEq)]
pub enum Removed<T> {
    Deleted(T),
    Absent,
}

impl<T> Removed<T> {
    pub fn was_deleted(&self) -> bool {
        matches!(self, Removed::Deleted(_))
    }
}

/// Map a not-found error to `None`, keep every other error.
pub fn found<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiError::NotFound { .. }) => Ok(None),
        Err(other) => Err(other),
    }
}

/// Run `lookup`; if it yields a resource, skip. Otherwise call `create`
/// exactly once.
///
/// `kind` and `key` only feed the log line recording the decision.
pub async fn ensure<T, E, L, C, Fut>(kind: &str, key: &str, lookup: L, create: C) -> Result<Ensured<T>, E>
where
    L: Future<Output = Result<Option<T>, E>>,
    C: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(existing) = lookup.await? {
        info!(kind, key, "Resource already exists... Skipping");
        return Ok(Ensured::Existing(existing));
    }
    info!(kind, key, "Resource not found... Creating it now");
    let created = create().await?;
    Ok(Ensured::Created(created))
}

/// Teardown counterpart of [`ensure`]: delete what `lookup` finds, log a
/// skip when it finds nothing.
pub async fn remove_if_present<T, R, E, L, D, Fut>(
    kind: &str,
    key: &str,
    lookup: L,
    delete: D,
) -> Result<Removed<R>, E>
where
    L: Future<Output = Result<Option<T>, E>>,
    D: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    match lookup.await? {
        Some(existing) => {
            info!(kind, key, "Resource found... Deleting");
            Ok(Removed::Deleted(delete(existing).await?))
        }
        None => {
            info!(kind, key, "Resource not found... Already deleted");
            Ok(Removed::Absent)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Existence checks by natural key
// ═══════════════════════════════════════════════════════════════════════

/// Whether a policy named `name` of `kind` exists.
///
/// A lookup that answers with a differently named policy counts as absent.
pub async fn policy_exists(
    api: &dyn ResourceApi,
    kind: PolicyKind,
    name: &str,
) -> Result<bool, ApiError> {
    match found(api.get_policy(kind, name).await)? {
        Some(detail) => Ok(detail.name == name),
        None => {
            info!(%kind, name, "OpenSearch policy not found");
            Ok(false)
        }
    }
}

/// Detailed collection lookup by exact name.
pub async fn find_collection(
    api: &dyn ResourceApi,
    name: &str,
) -> Result<Option<Collection>, ApiError> {
    let collections = api.get_collections(name).await?;
    let hit = collections.into_iter().find(|c| c.name == name);
    if hit.is_none() {
        info!(name, "OpenSearch collection not found");
    }
    Ok(hit)
}

/// Knowledge base lookup by name across the (paginated) listing.
pub async fn find_knowledge_base(
    api: &dyn ResourceApi,
    name: &str,
) -> Result<Option<KnowledgeBaseSummary>, ApiError> {
    let summaries = api.list_knowledge_bases().await?;
    Ok(summaries.into_iter().find(|kb| kb.name == name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn found_maps_only_not_found() {
        assert_eq!(found(Ok::<_, ApiError>(5)).unwrap(), Some(5));
        assert_eq!(
            found::<u32>(Err(ApiError::not_found("policy"))).unwrap(),
            None
        );
        let err = found::<u32>(Err(ApiError::service("aoss", 400, "ValidationException", "bad")))
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn ensure_skips_existing() {
        let creates = Cell::new(0);
        let result = ensure(
            "policy",
            "p",
            async { Ok::<_, ApiError>(Some("existing")) },
            || {
                creates.set(creates.get() + 1);
                async { Ok("created") }
            },
        )
        .await
        .unwrap();
        assert_eq!(result, Ensured::Existing("existing"));
        assert!(!result.was_created());
        assert_eq!(creates.get(), 0);
    }

    #[tokio::test]
    async fn ensure_creates_once_when_absent() {
        let creates = Cell::new(0);
        let result = ensure(
            "policy",
            "p",
            async { Ok::<Option<&str>, ApiError>(None) },
            || {
                creates.set(creates.get() + 1);
                async { Ok("created") }
            },
        )
        .await
        .unwrap();
        assert!(result.was_created());
        assert_eq!(result.into_inner(), "created");
        assert_eq!(creates.get(), 1);
    }

    #[tokio::test]
    async fn ensure_propagates_lookup_failure_without_creating() {
        let creates = Cell::new(0);
        let err = ensure(
            "collection",
            "c",
            async {
                Err::<Option<&str>, _>(ApiError::service("aoss", 403, "AccessDeniedException", "no"))
            },
            || {
                creates.set(creates.get() + 1);
                async { Ok("created") }
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Service { status: 403, .. }));
        assert_eq!(creates.get(), 0);
    }

    #[tokio::test]
    async fn remove_skips_absent() {
        let removed = remove_if_present(
            "policy",
            "p",
            async { Ok::<Option<u32>, ApiError>(None) },
            |_| async { Ok::<_, ApiError>(()) },
        )
        .await
        .unwrap();
        assert_eq!(removed, Removed::Absent);
        assert!(!removed.was_deleted());
    }

    #[tokio::test]
    async fn remove_passes_found_value_to_delete() {
        let removed = remove_if_present(
            "collection",
            "c",
            async { Ok::<_, ApiError>(Some(41u32)) },
            |id| async move { Ok::<_, ApiError>(id + 1) },
        )
        .await
        .unwrap();
        assert_eq!(removed, Removed::Deleted(42));
    }
}
