use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use guardian_sync::constants::{KEY_DEVICE_ID, KEY_DEVICE_MODE, KEY_DEVICE_NAME};
use guardian_sync::gateway::{BackendGateway, HttpGateway};
use guardian_sync::identity::DeviceIdentity;
use guardian_sync::models::Role;
use guardian_sync::serve::{router, RelayState};
use guardian_sync::store::{KeyValueStore, MemoryStore};
use guardian_sync::{derive_pairing_code, Error};

/// Start a relay on a random local port
async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let app = router(Arc::new(RelayState::new()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    (url, handle)
}

fn gateway(url: &str) -> Arc<dyn BackendGateway> {
    Arc::new(HttpGateway::new(url, Duration::from_secs(5)).unwrap())
}

fn identity(url: &str) -> (DeviceIdentity, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (DeviceIdentity::new(store.clone(), gateway(url)), store)
}

/// Memory store whose role write fails once armed
#[derive(Default)]
struct FailingRoleStore {
    inner: MemoryStore,
    fail_role_write: AtomicBool,
}

impl KeyValueStore for FailingRoleStore {
    fn get(&self, key: &str) -> guardian_sync::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> guardian_sync::Result<()> {
        if key == KEY_DEVICE_MODE && self.fail_role_write.load(Ordering::SeqCst) {
            return Err(Error::Store("disk full".to_string()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> guardian_sync::Result<()> {
        self.inner.remove(key)
    }

    fn clear(&self) -> guardian_sync::Result<()> {
        self.inner.clear()
    }
}

#[tokio::test]
async fn test_parent_setup_persists_role() {
    let (url, _server) = start_test_server().await;
    let (parent, store) = identity(&url);

    let device = parent.setup(Role::Parent, "Mom's phone", None).await.unwrap();

    assert_eq!(device.role, Role::Parent);
    assert!(device.parent_device_id.is_none());
    assert_eq!(parent.current_role().unwrap(), Some(Role::Parent));
    assert_eq!(
        store.get(KEY_DEVICE_ID).unwrap(),
        Some(device.device_id.clone())
    );
    assert_eq!(derive_pairing_code(&device.device_id).len(), 6);

    // No children yet is a normal answer
    let children = gateway(&url).children(&device.device_id).await.unwrap();
    assert!(children.is_empty());
}

#[tokio::test]
async fn test_child_appears_under_parent() {
    let (url, _server) = start_test_server().await;
    let (parent, _) = identity(&url);
    let (child, _) = identity(&url);

    let parent_device = parent.setup(Role::Parent, "Parent", None).await.unwrap();
    let child_device = child
        .setup(Role::Child, "Kid tablet", Some(&parent_device.device_id))
        .await
        .unwrap();

    assert_eq!(
        child.parent_device_id().unwrap(),
        Some(parent_device.device_id.clone())
    );

    let children = gateway(&url)
        .children(&parent_device.device_id)
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].device_id, child_device.device_id);
    assert_eq!(children[0].device_name, "Kid tablet");
}

#[tokio::test]
async fn test_setup_failure_keeps_id_and_no_role() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let (device, store) = identity(&url);
    let err = device.setup(Role::Parent, "Offline", None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got {:?}", err);

    let id = store.get(KEY_DEVICE_ID).unwrap();
    assert!(id.is_some());
    assert_eq!(store.get(KEY_DEVICE_MODE).unwrap(), None);
    assert_eq!(device.current_role().unwrap(), None);

    // A retry reuses the same id
    assert_eq!(device.ensure_device_id().unwrap(), id.unwrap());
}

#[tokio::test]
async fn test_child_without_parent_is_rejected() {
    let (url, _server) = start_test_server().await;
    let (child, store) = identity(&url);

    let err = child.setup(Role::Child, "Kid", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSetup(_)));
    let err = child.setup(Role::Child, "Kid", Some("  ")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSetup(_)));
    assert_eq!(store.get(KEY_DEVICE_MODE).unwrap(), None);

    let err = child.setup(Role::Parent, "   ", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSetup(_)));
}

#[tokio::test]
async fn test_device_cannot_pair_with_itself() {
    let (url, _server) = start_test_server().await;
    let (device, _) = identity(&url);
    let own_id = device.ensure_device_id().unwrap();

    let err = device
        .setup(Role::Child, "Loop", Some(&own_id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSetup(_)));
}

#[tokio::test]
async fn test_re_pairing_moves_child_to_new_parent() {
    let (url, _server) = start_test_server().await;
    let (first, _) = identity(&url);
    let (second, _) = identity(&url);
    let (child, _) = identity(&url);

    let first = first.setup(Role::Parent, "First", None).await.unwrap();
    let second = second.setup(Role::Parent, "Second", None).await.unwrap();

    child
        .setup(Role::Child, "Kid", Some(&first.device_id))
        .await
        .unwrap();
    let child_device = child
        .setup(Role::Child, "Kid", Some(&second.device_id))
        .await
        .unwrap();

    let gw = gateway(&url);
    assert!(gw.children(&first.device_id).await.unwrap().is_empty());
    let children = gw.children(&second.device_id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].device_id, child_device.device_id);
    assert_eq!(
        child.parent_device_id().unwrap(),
        Some(second.device_id.clone())
    );
}

#[tokio::test]
async fn test_switching_child_to_parent_drops_binding() {
    let (url, _server) = start_test_server().await;
    let (parent, _) = identity(&url);
    let (device, _) = identity(&url);

    let parent = parent.setup(Role::Parent, "Parent", None).await.unwrap();
    device
        .setup(Role::Child, "Kid", Some(&parent.device_id))
        .await
        .unwrap();
    device.setup(Role::Parent, "Now a parent", None).await.unwrap();

    assert_eq!(device.parent_device_id().unwrap(), None);
    assert!(gateway(&url)
        .children(&parent.device_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_rename_updates_backend() {
    let (url, _server) = start_test_server().await;
    let (parent, _) = identity(&url);
    let (child, _) = identity(&url);

    let parent = parent.setup(Role::Parent, "Parent", None).await.unwrap();
    child
        .setup(Role::Child, "Old name", Some(&parent.device_id))
        .await
        .unwrap();

    let renamed = child.rename("New name").await.unwrap();
    assert_eq!(renamed.device_name, "New name");
    assert_eq!(child.device_name().unwrap(), Some("New name".to_string()));

    let children = gateway(&url).children(&parent.device_id).await.unwrap();
    assert_eq!(children[0].device_name, "New name");
}

#[tokio::test]
async fn test_rename_before_setup_fails() {
    let (url, _server) = start_test_server().await;
    let (device, _) = identity(&url);
    let err = device.rename("Name").await.unwrap_err();
    assert!(matches!(err, Error::NotConfigured(_)));
}

#[tokio::test]
async fn test_reset_forgets_identity() {
    let (url, _server) = start_test_server().await;
    let (device, store) = identity(&url);
    device.setup(Role::Parent, "Parent", None).await.unwrap();

    device.reset().unwrap();
    assert_eq!(device.device().unwrap(), None);
    assert_eq!(store.get(KEY_DEVICE_ID).unwrap(), None);
}

#[tokio::test]
async fn test_failed_local_write_restores_previous_setup() {
    let (url, _server) = start_test_server().await;
    let store = Arc::new(FailingRoleStore::default());
    let device = DeviceIdentity::new(store.clone(), gateway(&url));

    let first = device
        .setup(Role::Child, "Kid", Some("device_1700000000_parent000"))
        .await
        .unwrap();
    assert_eq!(first.role, Role::Child);

    store.fail_role_write.store(true, Ordering::SeqCst);
    let err = device
        .setup(Role::Parent, "Renamed parent", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)), "got {:?}", err);

    // Name and parent binding roll back alongside the unwritten role
    assert_eq!(store.get(KEY_DEVICE_NAME).unwrap().as_deref(), Some("Kid"));
    assert_eq!(
        device.parent_device_id().unwrap().as_deref(),
        Some("device_1700000000_parent000")
    );
    assert_eq!(device.current_role().unwrap(), Some(Role::Child));
}
