use std::time::Duration;

use kb_harness::config::{Config, FailurePolicy};
use kb_harness::context::DeployContext;
use kb_harness::error::{OrchestrationError, WaitError};
use kb_harness::memory::{Call, InMemoryCloud};
use kb_harness::models::{
    CollectionRequest, CollectionStatus, IngestionStatus, PolicyKind, ResourceKind,
    SecurityPolicy,
};
use kb_harness::provision::{provision, run_provision};
use kb_harness::traits::ResourceApi;
use serde_json::json;
use tokio::time::Instant;

const ROLE: &str = "AmazonBedrockExecutionRoleForKnowledgeBase_Default";
const ROLE_ARN: &str =
    "arn:aws:iam::123456789012:role/AmazonBedrockExecutionRoleForKnowledgeBase_Default";

fn context(config: &Config) -> DeployContext {
    DeployContext::with_resolved(
        config,
        ROLE_ARN.to_string(),
        "amazon-bedrock-knowledge-base-x1y2".to_string(),
    )
}

fn kinds(entries: &[kb_harness::models::ResourceRef]) -> Vec<ResourceKind> {
    entries.iter().map(|e| e.kind).collect()
}

#[tokio::test(start_paused = true)]
async fn test_fresh_account_builds_the_whole_stack_in_order() {
    let config = Config::default();
    let cloud = InMemoryCloud::new();
    let report = provision(&context(&config), &cloud).await.unwrap();

    assert!(report.existing.is_empty());
    assert_eq!(
        kinds(&report.created),
        vec![
            ResourceKind::Policy(PolicyKind::Access),
            ResourceKind::Policy(PolicyKind::Encryption),
            ResourceKind::Policy(PolicyKind::Network),
            ResourceKind::Collection,
            ResourceKind::Index,
            ResourceKind::KnowledgeBase,
            ResourceKind::DataSource,
        ]
    );

    let creates: Vec<&'static str> = cloud
        .calls()
        .iter()
        .filter(|c| c.is_create() || matches!(c, Call::StartIngestionJob { .. }))
        .map(|c| c.operation())
        .collect();
    assert_eq!(
        creates,
        vec![
            "CreatePolicy",
            "CreatePolicy",
            "CreatePolicy",
            "CreateCollection",
            "CreateIndex",
            "CreateKnowledgeBase",
            "CreateDataSource",
            "StartIngestionJob",
        ]
    );

    assert_eq!(report.collection.status, CollectionStatus::Active);
    assert!(report.collection.endpoint.is_some());
    assert_eq!(report.ingestion.status, IngestionStatus::Complete);
    assert_eq!(cloud.index_names(), vec!["bedrock-knowledge-base-default-index"]);
    assert_eq!(cloud.knowledge_base_names(), vec!["demo-rag"]);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_creates_nothing() {
    let config = Config::default();
    let cloud = InMemoryCloud::new();
    let ctx = context(&config);
    let first = provision(&ctx, &cloud).await.unwrap();

    cloud.clear_calls();
    let second = provision(&ctx, &cloud).await.unwrap();

    assert!(second.created.is_empty());
    assert_eq!(second.existing.len(), 7);
    assert!(cloud.calls().iter().all(|c| !c.is_create()));
    assert_eq!(second.knowledge_base_id, first.knowledge_base_id);
    assert_eq!(second.data_source_id, first.data_source_id);
    assert_eq!(cloud.data_source_ids().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_existing_access_policy_is_reused() {
    let config = Config::default();
    let cloud = InMemoryCloud::new();
    cloud
        .create_policy(&SecurityPolicy {
            name: "bedrock-security-policy".to_string(),
            kind: PolicyKind::Access,
            description: String::new(),
            document: json!([]),
        })
        .await
        .unwrap();
    cloud.clear_calls();

    let report = provision(&context(&config), &cloud).await.unwrap();

    assert_eq!(
        kinds(&report.existing),
        vec![ResourceKind::Policy(PolicyKind::Access)]
    );
    let policy_creates: Vec<Call> = cloud
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::CreatePolicy(..)))
        .collect();
    assert_eq!(
        policy_creates,
        vec![
            Call::CreatePolicy(PolicyKind::Encryption, "bedrock-security-policy".to_string()),
            Call::CreatePolicy(PolicyKind::Network, "bedrock-security-policy".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_data_source_is_created_under_the_new_knowledge_base() {
    let config = Config::default();
    let cloud = InMemoryCloud::new();
    let report = provision(&context(&config), &cloud).await.unwrap();

    let parent = cloud.calls().into_iter().find_map(|c| match c {
        Call::CreateDataSource {
            knowledge_base_id,
            name,
        } => Some((knowledge_base_id, name)),
        _ => None,
    });
    assert_eq!(
        parent,
        Some((report.knowledge_base_id.clone(), "demo-rag-data-source".to_string()))
    );
    assert!(cloud.calls().contains(&Call::StartIngestionJob {
        knowledge_base_id: report.knowledge_base_id,
        data_source_id: report.data_source_id,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_waits_follow_the_configured_intervals() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_collection_activation(2, CollectionStatus::Active);

    let start = Instant::now();
    provision(&context(&config), &cloud).await.unwrap();

    // two 30s collection polls, then the 45s + 30s index settle delays
    assert_eq!(start.elapsed(), Duration::from_secs(135));
    let collection_lookups = cloud
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::GetCollections(_)))
        .count();
    // initial lookup, three polls, lookup for the endpoint
    assert_eq!(collection_lookups, 5);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_stack_waits_for_access_rules_before_the_index_check() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_access_rule_delay(Duration::from_secs(45));

    let report = provision(&context(&config), &cloud).await.unwrap();

    assert!(kinds(&report.created).contains(&ResourceKind::Index));
    assert_eq!(cloud.index_names(), vec!["bedrock-knowledge-base-default-index"]);
    let calls = cloud.calls();
    let check = calls
        .iter()
        .position(|c| matches!(c, Call::IndexExists(_)))
        .unwrap();
    assert!(matches!(calls[check + 1], Call::CreateIndex(_)));
}

#[tokio::test(start_paused = true)]
async fn test_rerun_checks_the_index_without_settling() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_access_rule_delay(Duration::from_secs(45));
    let ctx = context(&config);
    provision(&ctx, &cloud).await.unwrap();

    let start = Instant::now();
    let second = provision(&ctx, &cloud).await.unwrap();

    assert!(second.created.is_empty());
    assert!(start.elapsed() < Duration::from_secs(45));
}

#[tokio::test(start_paused = true)]
async fn test_unenforced_access_rules_surface_as_api_errors() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_access_rule_delay(Duration::from_secs(300));

    let err = provision(&context(&config), &cloud).await.unwrap_err();

    match err {
        OrchestrationError::Api(api) => assert!(api.to_string().contains("security_exception")),
        other => panic!("unexpected error: {}", other),
    }
    assert!(cloud.index_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_collection_being_deleted_ends_the_wait() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_deletion_polls(100);
    cloud
        .create_policy(&context(&config).policy(PolicyKind::Encryption))
        .await
        .unwrap();
    let collection = cloud
        .create_collection(&CollectionRequest {
            name: "demo-rag-os-collection".to_string(),
            description: String::new(),
            standby_replicas: false,
        })
        .await
        .unwrap();
    cloud.delete_collection(&collection.id).await.unwrap();
    cloud.clear_calls();

    let start = Instant::now();
    let err = provision(&context(&config), &cloud).await.unwrap_err();

    assert!(!err.is_timeout());
    assert!(matches!(
        err,
        OrchestrationError::Wait(WaitError::UnexpectedState { .. })
    ));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(cloud
        .calls()
        .iter()
        .all(|c| !matches!(c, Call::CreateCollection(_) | Call::IndexExists(_))));
}

#[tokio::test(start_paused = true)]
async fn test_collection_vanishing_mid_wait_ends_the_wait() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_collection_activation(5, CollectionStatus::Active);
    let ctx = context(&config);

    let remove = async {
        tokio::time::sleep(Duration::from_secs(15)).await;
        let id = cloud.get_collections("demo-rag-os-collection").await.unwrap()[0]
            .id
            .clone();
        cloud.delete_collection(&id).await.unwrap();
        cloud.list_collections("demo-rag-os-collection").await.unwrap();
    };
    let (result, ()) = tokio::join!(provision(&ctx, &cloud), remove);

    let err = result.unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.to_string().contains("None"), "{}", err);
    assert!(cloud.collection_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_knowledge_base_is_polled_until_active() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_knowledge_base_activation(3);
    provision(&context(&config), &cloud).await.unwrap();

    let polls = cloud
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::GetKnowledgeBase(_)))
        .count();
    assert_eq!(polls, 4);

    let position = |op: &str| cloud.calls().iter().position(|c| c.operation() == op);
    assert!(position("GetKnowledgeBase") < position("CreateDataSource"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_collection_stops_before_the_index() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_collection_activation(1, CollectionStatus::Failed);
    let err = provision(&context(&config), &cloud).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestrationError::Wait(WaitError::UnexpectedState { .. })
    ));
    assert!(cloud
        .calls()
        .iter()
        .all(|c| !matches!(c, Call::IndexExists(_) | Call::CreateIndex(_))));
}

#[tokio::test(start_paused = true)]
async fn test_knowledge_base_failure_reasons_abort_by_default() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_knowledge_base_failures(&["role cannot be assumed"]);
    let err = provision(&context(&config), &cloud).await.unwrap_err();

    match err {
        OrchestrationError::CreateFailed { kind, name, reasons } => {
            assert_eq!(kind, "knowledge base");
            assert_eq!(name, "demo-rag");
            assert_eq!(reasons, vec!["role cannot be assumed"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(
        cloud.calls().last().map(Call::operation),
        Some("CreateKnowledgeBase")
    );
}

#[tokio::test(start_paused = true)]
async fn test_warn_policy_logs_failure_reasons_and_continues() {
    let mut config = Config::default();
    config.orchestration.on_create_failure = FailurePolicy::Warn;
    let cloud = InMemoryCloud::new()
        .with_knowledge_base_failures(&["role cannot be assumed"])
        .with_data_source_failures(&["bucket not readable"]);

    let report = provision(&context(&config), &cloud).await.unwrap();
    assert_eq!(report.ingestion.status, IngestionStatus::Complete);
    assert_eq!(report.created.len(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_ingestion_timeout_leaves_resources_in_place() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_ingestion(1_000, IngestionStatus::Complete);

    let start = Instant::now();
    let err = provision(&context(&config), &cloud).await.unwrap_err();

    assert!(err.is_timeout(), "{}", err);
    // index settle delays plus just over the 500s ingestion timeout
    assert!(start.elapsed() >= Duration::from_secs(75 + 500));
    assert!(start.elapsed() <= Duration::from_secs(75 + 520));
    assert_eq!(cloud.knowledge_base_names(), vec!["demo-rag"]);
    assert_eq!(cloud.data_source_ids().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_ingestion_ends_early() {
    let config = Config::default();
    let cloud = InMemoryCloud::new().with_ingestion(2, IngestionStatus::Failed);
    let err = provision(&context(&config), &cloud).await.unwrap_err();

    assert!(!err.is_timeout());
    assert!(err.to_string().contains("Failed"), "{}", err);
    let job_polls = cloud
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::GetIngestionJob(_)))
        .count();
    assert_eq!(job_polls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_api_errors_stop_the_run_without_rollback() {
    let config = Config::default();
    let cloud = InMemoryCloud::new();
    cloud.fail_next("CreateKnowledgeBase", 403, "AccessDeniedException");

    let err = provision(&context(&config), &cloud).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Api(_)));
    assert_eq!(cloud.collection_names(), vec!["demo-rag-os-collection"]);
    assert!(cloud.knowledge_base_names().is_empty());

    // the rerun resumes at the knowledge base
    cloud.clear_calls();
    let report = provision(&context(&config), &cloud).await.unwrap();
    assert_eq!(
        kinds(&report.created),
        vec![ResourceKind::KnowledgeBase, ResourceKind::DataSource]
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_provision_resolves_role_and_bucket() {
    let config = Config::default();
    let cloud = InMemoryCloud::new()
        .with_role(ROLE, ROLE_ARN)
        .with_bucket("access-logs")
        .with_bucket("amazon-bedrock-knowledge-base-x1y2");

    run_provision(&config, &cloud).await.unwrap();

    let calls = cloud.calls();
    assert_eq!(calls[0], Call::RoleArn(ROLE.to_string()));
    assert_eq!(calls[1], Call::ListBuckets);
    assert_eq!(cloud.knowledge_base_names(), vec!["demo-rag"]);
}

#[tokio::test(start_paused = true)]
async fn test_run_provision_without_matching_bucket_creates_nothing() {
    let config = Config::default();
    let cloud = InMemoryCloud::new()
        .with_role(ROLE, ROLE_ARN)
        .with_bucket("access-logs");

    let err = run_provision(&config, &cloud).await.unwrap_err();
    assert!(err.to_string().contains("No bucket matches"), "{}", err);
    assert!(cloud.calls().iter().all(|c| !c.is_create()));
}
