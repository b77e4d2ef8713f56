use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use devkit_auth::scripted::{ScriptedDelegate, ScriptedDirectory, ScriptedPrompt};
use devkit_auth::{
    OrganizationListing, OrganizationRecord, SessionChangeEvent, SessionCollaborators,
    SessionManager, SessionManagerConfig, SignedInProjection,
};
use devkit_secrets::{FileSecretStore, FileSecretStoreOptions, SecretStoreEncryptionMode};
use tokio::sync::broadcast;

const STORE_KEY: &str = "integration-store-passphrase";

fn open_store(path: &Path) -> Arc<FileSecretStore> {
    Arc::new(
        FileSecretStore::open(FileSecretStoreOptions {
            path: path.to_path_buf(),
            encryption: SecretStoreEncryptionMode::Keyed,
            key: Some(STORE_KEY.to_string()),
        })
        .expect("open secret store"),
    )
}

fn listing() -> OrganizationListing {
    OrganizationListing {
        owned: vec![OrganizationRecord::new("contoso", "contoso")],
        member: vec![OrganizationRecord::new("fabrikam", "fabrikam")],
    }
}

fn manager_over(store: Arc<FileSecretStore>, prompt: ScriptedPrompt) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        SessionManagerConfig::default(),
        SessionCollaborators {
            secrets: store,
            delegate: Arc::new(ScriptedDelegate::returning("shared-token")),
            directory: Arc::new(
                ScriptedDirectory::new(listing())
                    .with_principal("contoso", "user-contoso")
                    .with_principal("fabrikam", "user-fabrikam"),
            ),
            prompt: Arc::new(prompt),
        },
    ))
}

async fn next_event(events: &mut broadcast::Receiver<SessionChangeEvent>) -> SessionChangeEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("session event within timeout")
        .expect("session event channel open")
}

#[tokio::test]
async fn integration_session_survives_restart_through_encrypted_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("secrets.json");

    let first = manager_over(open_store(&path), ScriptedPrompt::new().choosing("contoso"));
    let created = first.create_session().await.expect("create session");
    drop(first);

    let raw = std::fs::read_to_string(&path).expect("store file");
    assert!(!raw.contains("shared-token"));

    let restarted = manager_over(open_store(&path), ScriptedPrompt::new());
    let restored = restarted
        .initialize()
        .await
        .expect("initialize")
        .expect("restored session");
    assert_eq!(restored, created);
    assert_eq!(restored.organization_id(), "contoso");
    assert_eq!(restored.principal_id(), Some("user-contoso"));
}

#[tokio::test]
async fn integration_sign_in_from_another_process_is_adopted_after_refresh() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("secrets.json");
    let writer = manager_over(open_store(&path), ScriptedPrompt::new().choosing("fabrikam"));
    let observer_store = open_store(&path);
    let observer = manager_over(Arc::clone(&observer_store), ScriptedPrompt::new());

    assert_eq!(observer.initialize().await.expect("initialize"), None);
    let projection = SignedInProjection::spawn(&observer);
    let reconciler = observer.watch_secret_changes();
    let mut events = observer.subscribe();

    let created = writer.create_session().await.expect("create session");
    let changed = observer_store.refresh_from_disk().expect("refresh");
    assert_eq!(changed, vec!["AzureDevOpsOAuth".to_string()]);

    let event = next_event(&mut events).await;
    assert_eq!(event.added, vec![created.clone()]);
    assert!(event.removed.is_empty());
    assert_eq!(observer.get_sessions(), vec![created]);

    let mut signed_in = projection.receiver();
    tokio::time::timeout(Duration::from_secs(10), signed_in.wait_for(|value| *value))
        .await
        .expect("projection within timeout")
        .expect("projection channel open");
    reconciler.abort();
}

#[tokio::test]
async fn integration_sign_out_from_another_process_removes_local_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("secrets.json");
    let writer = manager_over(open_store(&path), ScriptedPrompt::new().choosing("contoso"));
    let created = writer.create_session().await.expect("create session");

    let observer_store = open_store(&path);
    let observer = manager_over(Arc::clone(&observer_store), ScriptedPrompt::new());
    assert_eq!(
        observer.initialize().await.expect("initialize"),
        Some(created.clone())
    );
    let reconciler = observer.watch_secret_changes();
    let mut events = observer.subscribe();

    assert_eq!(
        writer.remove_session().await.expect("remove session"),
        Some(created.clone())
    );
    observer_store.refresh_from_disk().expect("refresh");

    let event = next_event(&mut events).await;
    assert!(event.added.is_empty());
    assert_eq!(event.removed, vec![created]);
    assert!(observer.get_sessions().is_empty());
    reconciler.abort();
}

#[tokio::test]
async fn integration_file_watcher_delivers_organization_switch_from_another_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("secrets.json");
    let writer = manager_over(
        open_store(&path),
        ScriptedPrompt::new().choosing("contoso").choosing("fabrikam"),
    );
    let first = writer.create_session().await.expect("create session");

    let observer_store = open_store(&path);
    observer_store.start_watching().expect("watch store");
    let observer = manager_over(Arc::clone(&observer_store), ScriptedPrompt::new());
    observer.initialize().await.expect("initialize");
    let reconciler = observer.watch_secret_changes();
    let mut events = observer.subscribe();

    let switched = writer
        .switch_organization()
        .await
        .expect("switch organization");
    assert_eq!(switched.organization_id(), "fabrikam");

    let event = next_event(&mut events).await;
    assert_eq!(event.removed, vec![first]);
    assert_eq!(event.added, vec![switched.clone()]);
    assert_eq!(observer.get_sessions(), vec![switched]);
    reconciler.abort();
}
