use std::sync::Arc;
use std::time::Duration;

use devkit_secrets::{MemorySecretStore, SecretStore};
use tokio::sync::broadcast::error::TryRecvError;

use crate::scripted::{ScriptedDelegate, ScriptedDirectory, ScriptedPrompt};
use crate::{
    BearerCredential, DelegateError, DelegatedCredential, DirectoryError, IdentityDelegate,
    OrganizationListing, OrganizationRecord, PersistedSessionRecord, PersonalTokenDelegate,
    Session, SessionChangeEvent, SessionCollaborators, SessionError, SessionManager,
    SessionManagerConfig, SignedInProjection, OPEN_PORTAL_ACTION,
};

const KEY: &str = "AzureDevOpsOAuth";

struct Harness {
    manager: Arc<SessionManager>,
    secrets: Arc<MemorySecretStore>,
    delegate: Arc<ScriptedDelegate>,
    directory: Arc<ScriptedDirectory>,
    prompt: Arc<ScriptedPrompt>,
}

fn test_config() -> SessionManagerConfig {
    SessionManagerConfig {
        network_timeout_ms: 500,
        delegate_timeout_ms: 500,
        ..SessionManagerConfig::default()
    }
}

fn acme_beta() -> OrganizationListing {
    OrganizationListing {
        owned: vec![OrganizationRecord::new("A", "Acme")],
        member: vec![OrganizationRecord::new("B", "Beta")],
    }
}

fn harness_with(
    config: SessionManagerConfig,
    secrets: MemorySecretStore,
    delegate: ScriptedDelegate,
    directory: ScriptedDirectory,
    prompt: ScriptedPrompt,
) -> Harness {
    let secrets = Arc::new(secrets);
    let delegate = Arc::new(delegate);
    let directory = Arc::new(directory);
    let prompt = Arc::new(prompt);
    let manager = Arc::new(SessionManager::new(
        config,
        SessionCollaborators {
            secrets: secrets.clone(),
            delegate: delegate.clone(),
            directory: directory.clone(),
            prompt: prompt.clone(),
        },
    ));
    Harness {
        manager,
        secrets,
        delegate,
        directory,
        prompt,
    }
}

fn harness(delegate: ScriptedDelegate, prompt: ScriptedPrompt) -> Harness {
    harness_with(
        test_config(),
        MemorySecretStore::new(),
        delegate,
        ScriptedDirectory::new(acme_beta()),
        prompt,
    )
}

fn persisted(token: &str, organization: &str, user_id: &str) -> String {
    PersistedSessionRecord {
        access_token: token.to_string(),
        organization: organization.to_string(),
        user_id: Some(user_id.to_string()),
    }
    .encode()
    .expect("encode record")
}

fn delegated(token: &str) -> DelegatedCredential {
    DelegatedCredential::new(BearerCredential::new(token).expect("credential"))
}

#[tokio::test]
async fn functional_create_session_uses_selected_member_organization() {
    let h = harness(
        ScriptedDelegate::returning("token-a"),
        ScriptedPrompt::new().choosing("Beta"),
    );
    let mut events = h.manager.subscribe();

    let session = h.manager.create_session().await.expect("create");

    assert_eq!(session.organization_id(), "B");
    assert_eq!(session.principal_id(), Some("principal-1"));
    assert_eq!(session.credential().expose(), "token-a");
    assert_eq!(h.manager.get_sessions(), vec![session.clone()]);
    assert_eq!(
        h.directory.validations(),
        vec![("token-a".to_string(), "B".to_string())]
    );
    assert_eq!(
        h.secrets.peek(KEY),
        Some(persisted("token-a", "B", "principal-1"))
    );
    assert_eq!(
        events.try_recv().expect("event"),
        SessionChangeEvent {
            added: vec![session],
            removed: Vec::new(),
        }
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn functional_created_session_survives_restart() {
    let h = harness(
        ScriptedDelegate::returning("token-a"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let session = h.manager.create_session().await.expect("create");

    let restarted = SessionManager::new(
        test_config(),
        SessionCollaborators {
            secrets: h.secrets.clone(),
            delegate: Arc::new(ScriptedDelegate::failing("unused")),
            directory: Arc::new(ScriptedDirectory::new(OrganizationListing::default())),
            prompt: Arc::new(ScriptedPrompt::new()),
        },
    );
    let mut events = restarted.subscribe();
    let loaded = restarted.initialize().await.expect("initialize");

    assert_eq!(loaded, Some(session.clone()));
    assert_eq!(restarted.get_sessions(), vec![session]);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn functional_initialize_without_persisted_session_is_signed_out() {
    let h = harness(ScriptedDelegate::returning("t"), ScriptedPrompt::new());
    assert_eq!(h.manager.initialize().await.expect("initialize"), None);
    assert!(h.manager.get_sessions().is_empty());
    assert_eq!(h.secrets.get_calls(), 1);
}

#[tokio::test]
async fn regression_malformed_persisted_session_is_ignored_on_initialize() {
    let h = harness_with(
        test_config(),
        MemorySecretStore::new().with_entry(KEY, "{not-json"),
        ScriptedDelegate::returning("t"),
        ScriptedDirectory::new(acme_beta()),
        ScriptedPrompt::new(),
    );
    assert_eq!(h.manager.initialize().await.expect("initialize"), None);
    assert!(h.manager.get_sessions().is_empty());
}

#[tokio::test]
async fn functional_initialize_read_failure_is_persistence_failure() {
    let h = harness(ScriptedDelegate::returning("t"), ScriptedPrompt::new());
    h.secrets.fail_next_get();
    let error = h.manager.initialize().await.expect_err("must fail");
    assert!(matches!(error, SessionError::PersistenceFailed(_)));
}

#[tokio::test]
async fn functional_validation_failure_leaves_state_untouched() {
    let h = harness_with(
        test_config(),
        MemorySecretStore::new().with_entry(KEY, persisted("old", "A", "p-old")),
        ScriptedDelegate::returning("token-new"),
        ScriptedDirectory::new(acme_beta())
            .rejecting("B", DirectoryError::with_status(401, "unauthorized")),
        ScriptedPrompt::new().choosing("Beta"),
    );
    let before = h.manager.initialize().await.expect("initialize");
    let mut events = h.manager.subscribe();

    let error = h.manager.create_session().await.expect_err("must fail");

    assert_eq!(
        error,
        SessionError::ValidationFailed {
            organization: "Beta".to_string(),
            status: Some(401),
            message: "unauthorized".to_string(),
        }
    );
    assert_eq!(h.secrets.set_calls(), 0);
    assert_eq!(h.manager.get_sessions(), before.into_iter().collect::<Vec<_>>());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(
        h.prompt.errors_shown(),
        vec![
            "Failed to connect to organization \"Beta\". Please check if it exists and you have access to it."
                .to_string()
        ]
    );
    assert!(h.prompt.opened_urls().is_empty());
}

#[tokio::test]
async fn functional_validation_failure_offers_portal_remediation() {
    let h = harness_with(
        test_config(),
        MemorySecretStore::new(),
        ScriptedDelegate::returning("token"),
        ScriptedDirectory::new(acme_beta())
            .rejecting("A", DirectoryError::with_status(404, "missing")),
        ScriptedPrompt::new()
            .choosing("Acme")
            .answering_error_with(OPEN_PORTAL_ACTION),
    );

    let error = h.manager.create_session().await.expect_err("must fail");
    assert!(matches!(error, SessionError::ValidationFailed { .. }));
    assert_eq!(
        h.prompt.opened_urls(),
        vec!["https://dev.azure.com".to_string()]
    );
}

#[tokio::test]
async fn regression_validation_timeout_is_reported_as_validation_failure() {
    let h = harness_with(
        SessionManagerConfig {
            network_timeout_ms: 20,
            ..test_config()
        },
        MemorySecretStore::new(),
        ScriptedDelegate::returning("token"),
        ScriptedDirectory::new(acme_beta()).with_validate_delay(Duration::from_secs(5)),
        ScriptedPrompt::new().choosing("Acme"),
    );

    let error = h.manager.create_session().await.expect_err("must fail");
    match error {
        SessionError::ValidationFailed { status, message, .. } => {
            assert_eq!(status, None);
            assert!(message.contains("timed out"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.secrets.set_calls(), 0);
}

#[tokio::test]
async fn functional_delegation_failure_skips_directory() {
    let h = harness(
        ScriptedDelegate::failing("consent denied"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let error = h.manager.create_session().await.expect_err("must fail");
    assert_eq!(error, SessionError::DelegationFailed("consent denied".into()));
    assert_eq!(h.directory.profile_calls(), 0);
    assert!(h.prompt.choose_requests().is_empty());
}

#[tokio::test]
async fn regression_delegation_times_out() {
    let h = harness_with(
        SessionManagerConfig {
            delegate_timeout_ms: 20,
            ..test_config()
        },
        MemorySecretStore::new(),
        ScriptedDelegate::returning("slow").with_delay(Duration::from_secs(5)),
        ScriptedDirectory::new(acme_beta()),
        ScriptedPrompt::new(),
    );
    let error = h.manager.create_session().await.expect_err("must fail");
    assert_eq!(
        error,
        SessionError::TimedOut {
            operation: "identity delegation",
            timeout_ms: 20,
        }
    );
}

#[tokio::test]
async fn functional_declined_selection_persists_nothing() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().declining(),
    );
    let error = h.manager.create_session().await.expect_err("must fail");
    assert!(error.is_benign());
    assert_eq!(h.secrets.set_calls(), 0);
    assert!(h.directory.validations().is_empty());
    assert!(h.manager.get_sessions().is_empty());
}

#[tokio::test]
async fn functional_empty_listing_prompts_then_requires_selection() {
    let h = harness_with(
        test_config(),
        MemorySecretStore::new(),
        ScriptedDelegate::returning("token"),
        ScriptedDirectory::new(OrganizationListing::default()),
        ScriptedPrompt::new().declining(),
    );
    let error = h.manager.create_session().await.expect_err("must fail");
    assert!(matches!(error, SessionError::SelectionRequired(_)));
    assert_eq!(h.prompt.choose_requests().len(), 1);
}

#[tokio::test]
async fn functional_persistence_failure_keeps_memory_and_emits_nothing() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let mut events = h.manager.subscribe();
    h.secrets.fail_next_set();

    let error = h.manager.create_session().await.expect_err("must fail");
    assert!(matches!(error, SessionError::PersistenceFailed(_)));
    assert!(h.manager.get_sessions().is_empty());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn functional_switch_reuses_unexpired_credential() {
    let h = harness(
        ScriptedDelegate::sequence(vec![Ok(delegated("token-a"))]),
        ScriptedPrompt::new().choosing("Beta").choosing("Acme"),
    );
    let first = h.manager.create_session().await.expect("create");
    let mut events = h.manager.subscribe();

    let second = h.manager.switch_organization().await.expect("switch");

    assert_eq!(h.delegate.calls(), 1);
    assert_eq!(second.organization_id(), "A");
    assert_eq!(second.credential().expose(), "token-a");
    assert_eq!(h.manager.get_sessions(), vec![second.clone()]);
    assert_eq!(
        events.try_recv().expect("event"),
        SessionChangeEvent {
            added: vec![second],
            removed: vec![first],
        }
    );
}

#[tokio::test]
async fn functional_switch_with_expired_credential_delegates_again() {
    let h = harness(
        ScriptedDelegate::sequence(vec![
            Ok(delegated("token-a").expiring_at(1)),
            Ok(delegated("token-b")),
        ]),
        ScriptedPrompt::new().choosing("Acme").choosing("Beta"),
    );
    h.manager.create_session().await.expect("create");

    let switched = h.manager.switch_organization().await.expect("switch");
    assert_eq!(h.delegate.calls(), 2);
    assert_eq!(switched.credential().expose(), "token-b");
    assert_eq!(switched.organization_id(), "B");
}

#[tokio::test]
async fn functional_switch_reuses_credential_loaded_from_store() {
    let h = harness_with(
        test_config(),
        MemorySecretStore::new().with_entry(KEY, persisted("stored", "A", "p")),
        ScriptedDelegate::failing("must not delegate").interactive(),
        ScriptedDirectory::new(acme_beta()),
        ScriptedPrompt::new().choosing("Beta"),
    );
    h.manager.initialize().await.expect("initialize");

    let switched = h.manager.switch_organization().await.expect("switch");
    assert_eq!(h.delegate.calls(), 0);
    assert_eq!(switched.credential().expose(), "stored");
    assert_eq!(switched.organization_id(), "B");
}

#[tokio::test]
async fn regression_switch_after_restart_delegates_for_federated_credential() {
    let h = harness_with(
        test_config(),
        MemorySecretStore::new().with_entry(KEY, persisted("expired-token", "A", "p")),
        ScriptedDelegate::returning("fresh-token"),
        ScriptedDirectory::new(acme_beta()),
        ScriptedPrompt::new().choosing("Beta"),
    );
    h.manager.initialize().await.expect("initialize");

    let switched = h.manager.switch_organization().await.expect("switch");
    assert_eq!(h.delegate.calls(), 1);
    assert_eq!(switched.credential().expose(), "fresh-token");
    assert_eq!(
        h.directory.validations(),
        vec![("fresh-token".to_string(), "B".to_string())]
    );
    assert_eq!(
        h.secrets.peek(KEY),
        Some(persisted("fresh-token", "B", "principal-1"))
    );
}

#[tokio::test]
async fn regression_typed_token_is_not_cut_off_by_delegate_timeout() {
    let prompt = Arc::new(
        ScriptedPrompt::new()
            .entering("typed-pat")
            .with_input_delay(Duration::from_millis(200))
            .choosing("Acme"),
    );
    let manager = SessionManager::new(
        SessionManagerConfig {
            delegate_timeout_ms: 50,
            ..test_config()
        },
        SessionCollaborators {
            secrets: Arc::new(MemorySecretStore::new()),
            delegate: Arc::new(PersonalTokenDelegate::new(prompt.clone())),
            directory: Arc::new(ScriptedDirectory::new(acme_beta())),
            prompt: prompt.clone(),
        },
    );

    let session = manager.create_session().await.expect("create");
    assert_eq!(session.credential().expose(), "typed-pat");
    assert_eq!(session.organization_id(), "A");
    assert_eq!(prompt.input_requests().len(), 1);
}

#[tokio::test]
async fn functional_switch_without_session_behaves_like_create() {
    let h = harness(
        ScriptedDelegate::returning("fresh"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let session = h.manager.switch_organization().await.expect("switch");
    assert_eq!(h.delegate.calls(), 1);
    assert_eq!(session.organization_id(), "A");
}

#[tokio::test]
async fn functional_switch_failure_keeps_current_session() {
    let h = harness_with(
        test_config(),
        MemorySecretStore::new(),
        ScriptedDelegate::returning("token"),
        ScriptedDirectory::new(acme_beta()).rejecting("B", DirectoryError::new("denied")),
        ScriptedPrompt::new().choosing("Acme").choosing("Beta"),
    );
    let current = h.manager.create_session().await.expect("create");
    let error = h.manager.switch_organization().await.expect_err("must fail");
    assert!(matches!(error, SessionError::ValidationFailed { .. }));
    assert_eq!(h.manager.get_sessions(), vec![current]);
    assert_eq!(h.secrets.set_calls(), 1);
}

#[tokio::test]
async fn functional_remove_session_deletes_and_emits_removed() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let session = h.manager.create_session().await.expect("create");
    let mut events = h.manager.subscribe();

    let removed = h.manager.remove_session().await.expect("remove");

    assert_eq!(removed, Some(session.clone()));
    assert!(h.manager.get_sessions().is_empty());
    assert_eq!(h.secrets.peek(KEY), None);
    assert_eq!(
        events.try_recv().expect("event"),
        SessionChangeEvent {
            added: Vec::new(),
            removed: vec![session],
        }
    );
}

#[tokio::test]
async fn functional_remove_without_session_emits_empty_event() {
    let h = harness(ScriptedDelegate::returning("token"), ScriptedPrompt::new());
    let mut events = h.manager.subscribe();

    assert_eq!(h.manager.remove_session().await.expect("remove"), None);
    assert_eq!(h.secrets.delete_calls(), 0);
    assert_eq!(events.try_recv().expect("event"), SessionChangeEvent::default());
}

#[tokio::test]
async fn functional_remove_failure_keeps_session() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let session = h.manager.create_session().await.expect("create");
    h.secrets.fail_next_delete();

    let error = h.manager.remove_session().await.expect_err("must fail");
    assert!(matches!(error, SessionError::PersistenceFailed(_)));
    assert_eq!(h.manager.get_sessions(), vec![session]);
}

#[tokio::test]
async fn functional_reconcile_is_idempotent() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let original = h.manager.create_session().await.expect("create");
    let mut events = h.manager.subscribe();
    h.secrets
        .simulate_external_set(KEY, &persisted("other-token", "B", "p-2"))
        .expect("external write");

    let first = h.manager.reconcile().await.expect("change detected");
    let second = h.manager.reconcile().await;

    assert_eq!(second, None);
    assert_eq!(first.removed, vec![original]);
    assert_eq!(first.added.len(), 1);
    assert_eq!(first.added[0].organization_id(), "B");
    assert_eq!(events.try_recv().expect("event"), first);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn functional_reconcile_keeps_session_when_read_fails() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let session = h.manager.create_session().await.expect("create");
    h.secrets.fail_next_get();

    assert_eq!(h.manager.reconcile().await, None);
    assert_eq!(h.manager.get_sessions(), vec![session]);
}

#[tokio::test]
async fn integration_external_delete_triggers_reconcile() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let watcher = h.manager.watch_secret_changes();
    let session = h.manager.create_session().await.expect("create");
    let mut events = h.manager.subscribe();

    h.secrets
        .simulate_external_delete(KEY)
        .expect("external delete");
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event before timeout")
        .expect("event");

    assert_eq!(
        event,
        SessionChangeEvent {
            added: Vec::new(),
            removed: vec![session],
        }
    );
    assert!(h.manager.get_sessions().is_empty());
    watcher.abort();
}

#[tokio::test]
async fn regression_watcher_ignores_unrelated_keys() {
    let h = harness(ScriptedDelegate::returning("token"), ScriptedPrompt::new());
    let watcher = h.manager.watch_secret_changes();
    let reads_before = h.secrets.get_calls();

    h.secrets
        .simulate_external_set("unrelated", "value")
        .expect("external write");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.secrets.get_calls(), reads_before);
    watcher.abort();
}

#[tokio::test]
async fn integration_single_session_invariant_holds_across_operations() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new()
            .choosing("Acme")
            .choosing("Beta")
            .choosing("Acme")
            .choosing("Beta"),
    );
    let mut events = h.manager.subscribe();

    h.manager.create_session().await.expect("create");
    assert_eq!(h.manager.get_sessions().len(), 1);
    h.manager.switch_organization().await.expect("switch");
    assert_eq!(h.manager.get_sessions().len(), 1);
    h.manager.create_session().await.expect("create again");
    assert_eq!(h.manager.get_sessions().len(), 1);
    h.manager.remove_session().await.expect("remove");
    assert!(h.manager.get_sessions().is_empty());
    h.manager.switch_organization().await.expect("switch from empty");
    assert_eq!(h.manager.get_sessions().len(), 1);

    while let Ok(event) = events.try_recv() {
        assert!(event.added.len() <= 1);
        assert!(event.removed.len() <= 1);
    }
}

#[tokio::test]
async fn integration_concurrent_operations_are_serialized() {
    let h = harness(
        ScriptedDelegate::returning("token").with_delay(Duration::from_millis(30)),
        ScriptedPrompt::new().choosing("Acme").choosing("Beta"),
    );
    let mut events = h.manager.subscribe();

    let (first, second) = tokio::join!(h.manager.create_session(), h.manager.create_session());
    first.expect("first create");
    second.expect("second create");

    assert_eq!(h.delegate.max_in_flight(), 1);
    let first_event = events.try_recv().expect("first event");
    let second_event = events.try_recv().expect("second event");
    assert!(first_event.removed.is_empty());
    assert_eq!(second_event.removed, first_event.added);
    assert_eq!(h.manager.get_sessions(), second_event.added);
}

#[tokio::test]
async fn functional_signed_in_projection_follows_events() {
    let h = harness(
        ScriptedDelegate::returning("token"),
        ScriptedPrompt::new().choosing("Acme"),
    );
    let projection = SignedInProjection::spawn(&h.manager);
    let mut signed_in = projection.receiver();
    assert!(!projection.is_signed_in());

    h.manager.create_session().await.expect("create");
    tokio::time::timeout(Duration::from_secs(5), signed_in.wait_for(|value| *value))
        .await
        .expect("signed in before timeout")
        .expect("projection alive");

    h.manager.remove_session().await.expect("remove");
    tokio::time::timeout(Duration::from_secs(5), signed_in.wait_for(|value| !*value))
        .await
        .expect("signed out before timeout")
        .expect("projection alive");
}

#[tokio::test]
async fn unit_secret_store_trait_object_is_shared_between_managers() {
    let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
    let manager = SessionManager::new(
        test_config(),
        SessionCollaborators {
            secrets: secrets.clone(),
            delegate: Arc::new(ScriptedDelegate::returning("token")),
            directory: Arc::new(ScriptedDirectory::new(acme_beta())),
            prompt: Arc::new(ScriptedPrompt::new().choosing("Acme")),
        },
    );
    let session = manager.create_session().await.expect("create");
    let raw = secrets.get(KEY).await.expect("read").expect("present");
    assert_eq!(Session::from_persisted(&raw), Some(session));
}

#[tokio::test]
async fn unit_scripted_delegate_sequence_exhausts() {
    let delegate = ScriptedDelegate::sequence(vec![Err(DelegateError::new("first"))]);
    assert_eq!(
        delegate.acquire("scope").await.expect_err("first").message,
        "first"
    );
    assert!(delegate.acquire("scope").await.is_err());
    assert_eq!(delegate.calls(), 2);
}
