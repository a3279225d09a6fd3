use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use guardian_sync::gateway::{BackendGateway, HttpGateway};
use guardian_sync::identity::DeviceIdentity;
use guardian_sync::models::{
    ContactRecord, ContactsBatch, GeoPoint, LocationUpload, MediaBatch, MediaRecord, MediaType,
    Role,
};
use guardian_sync::parent::{media_view, MediaSort, ParentAggregator};
use guardian_sync::serve::{router, RelayState};
use guardian_sync::store::MemoryStore;

async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let app = router(Arc::new(RelayState::new()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    (url, handle)
}

fn gateway(url: &str) -> Arc<dyn BackendGateway> {
    Arc::new(HttpGateway::new(url, Duration::from_secs(5)).unwrap())
}

async fn register(url: &str, role: Role, name: &str, parent: Option<&str>) -> String {
    DeviceIdentity::new(Arc::new(MemoryStore::new()), gateway(url))
        .setup(role, name, parent)
        .await
        .unwrap()
        .device_id
}

fn upload_at(device_id: &str, minute: i64) -> LocationUpload {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    LocationUpload {
        device_id: device_id.to_string(),
        latitude: 51.5 + minute as f64 * 0.001,
        longitude: -0.12,
        accuracy: Some(10.0),
        speed: None,
        heading: None,
        captured_at: Some(base + ChronoDuration::minutes(minute)),
    }
}

fn media_item(id: &str, location: Option<GeoPoint>) -> MediaRecord {
    MediaRecord {
        media_id: id.to_string(),
        filename: format!("{}.HEIC", id),
        media_type: MediaType::Photo,
        creation_time: None,
        modification_time: None,
        width: None,
        height: None,
        duration: None,
        location,
    }
}

#[tokio::test]
async fn test_no_children_is_empty_list() {
    let (url, _server) = start_test_server().await;
    let parent_id = register(&url, Role::Parent, "Parent", None).await;

    let aggregator = ParentAggregator::new(gateway(&url), 50);
    assert!(aggregator.list_children(&parent_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_children_in_registration_order() {
    let (url, _server) = start_test_server().await;
    let parent_id = register(&url, Role::Parent, "Parent", None).await;
    let first = register(&url, Role::Child, "Ann", Some(&parent_id)).await;
    let second = register(&url, Role::Child, "Ben", Some(&parent_id)).await;
    register(&url, Role::Child, "Other family", Some("device_0_elsewhere")).await;

    let children = ParentAggregator::new(gateway(&url), 50)
        .list_children(&parent_id)
        .await
        .unwrap();
    let ids: Vec<&str> = children.iter().map(|c| c.device_id.as_str()).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    assert!(children.iter().all(|c| c.last_active.is_some()));
}

#[tokio::test]
async fn test_latest_location_absent_before_first_upload() {
    let (url, _server) = start_test_server().await;
    let aggregator = ParentAggregator::new(gateway(&url), 50);

    assert!(aggregator
        .latest_location("device_1700000000_nothing00")
        .await
        .unwrap()
        .is_none());
    assert!(aggregator
        .location_history("device_1700000000_nothing00", 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_history_newest_first_and_limited() {
    let (url, _server) = start_test_server().await;
    let gw = gateway(&url);
    let child = "device_1700000000_child0001";
    for minute in 0..5 {
        gw.upload_location(&upload_at(child, minute)).await.unwrap();
    }

    let aggregator = ParentAggregator::new(gw, 50);
    let history = aggregator.location_history(child, 3).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].captured_at >= pair[1].captured_at));
    assert_eq!(history[0].captured_at, upload_at(child, 4).captured_at.unwrap());

    let latest = aggregator.latest_location(child).await.unwrap().unwrap();
    assert_eq!(latest.captured_at, history[0].captured_at);
}

#[tokio::test]
async fn test_out_of_order_uploads_keep_latest_and_history_consistent() {
    let (url, _server) = start_test_server().await;
    let gw = gateway(&url);
    let child = "device_1700000000_child0003";

    // A late foreground fix lands after a newer background fix
    let mut newer = upload_at(child, 30);
    newer.latitude = 10.0;
    let mut older = upload_at(child, 0);
    older.latitude = 20.0;
    gw.upload_location(&newer).await.unwrap();
    gw.upload_location(&older).await.unwrap();

    let aggregator = ParentAggregator::new(gw.clone(), 50);
    let latest = aggregator.latest_location(child).await.unwrap().unwrap();
    assert_eq!(latest.latitude, 10.0);

    let history = aggregator.location_history(child, 1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], latest);

    // The relay itself hands back newest first
    let raw = gw.location_history(child, 2).await.unwrap();
    let lats: Vec<f64> = raw.iter().map(|s| s.latitude).collect();
    assert_eq!(lats, vec![10.0, 20.0]);
}

#[tokio::test]
async fn test_geotagged_media_view() {
    let (url, _server) = start_test_server().await;
    let gw = gateway(&url);
    let child = "device_1700000000_child0002";
    gw.upload_media(&MediaBatch {
        device_id: child.to_string(),
        media_items: vec![
            media_item("IMG_1", None),
            media_item(
                "IMG_2",
                Some(GeoPoint {
                    latitude: 48.8584,
                    longitude: 2.2945,
                }),
            ),
            media_item("IMG_3", None),
        ],
    })
    .await
    .unwrap();

    let media = ParentAggregator::new(gw, 50).media(child).await.unwrap();
    assert_eq!(media_view(&media, MediaSort::Recent).len(), 3);
    let geotagged = media_view(&media, MediaSort::Geotagged);
    assert_eq!(geotagged.len(), 1);
    assert_eq!(geotagged[0].media_id, "IMG_2");
}

#[tokio::test]
async fn test_refresh_fetches_selected_child() {
    let (url, _server) = start_test_server().await;
    let gw = gateway(&url);
    let parent_id = register(&url, Role::Parent, "Parent", None).await;
    let child_id = register(&url, Role::Child, "Kid", Some(&parent_id)).await;

    gw.upload_contacts(&ContactsBatch {
        device_id: child_id.clone(),
        contacts: vec![ContactRecord {
            contact_id: "1".to_string(),
            name: "Coach".to_string(),
            phone_numbers: vec!["+44 20 7946 0000".to_string()],
            emails: vec!["coach@example.com".to_string()],
        }],
    })
    .await
    .unwrap();
    for minute in 0..3 {
        gw.upload_location(&upload_at(&child_id, minute)).await.unwrap();
    }

    let aggregator = ParentAggregator::new(gw, 2);

    let view = aggregator.refresh(&parent_id, None).await.unwrap();
    assert_eq!(view.children.len(), 1);
    assert!(view.selected.is_none());

    let view = aggregator.refresh(&parent_id, Some(&child_id)).await.unwrap();
    let snapshot = view.selected.unwrap();
    assert_eq!(snapshot.device_id, child_id);
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(
        snapshot.latest_location.unwrap().captured_at,
        upload_at(&child_id, 2).captured_at.unwrap()
    );
    assert_eq!(snapshot.contacts[0].name, "Coach");
    assert!(snapshot.media.is_empty());
}
