//! End-to-end sync through a live relay.

use derivepass_core::sync::HttpTransport;
use derivepass_core::{
    ClientConfig, MasterSecret, MemoryStorage, RemoteSyncEngine, SiteRecord, SyncError, Vault,
};
use derivepass_relay::{auth, build_router, RelayConfig, RelayStorage};
use reqwest::StatusCode;
use serde_json::json;
use std::sync::Arc;

const MASTER: &str = "correct horse";

struct Relay {
    url: String,
    storage: RelayStorage,
}

async fn spawn_relay(config: RelayConfig) -> Relay {
    let storage = RelayStorage::in_memory().unwrap();
    auth::create_user(&storage, "alice", "secret").unwrap();

    let app = build_router(storage.clone(), &config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Relay {
        url: format!("http://{}", addr),
        storage,
    }
}

struct Device {
    vault: Vault,
    engine: RemoteSyncEngine,
}

impl Device {
    async fn linked(relay: &Relay) -> Self {
        let config = ClientConfig {
            auto_lock_secs: 0,
            ..ClientConfig::default()
        };
        let vault = Vault::open(Arc::new(MemoryStorage::new()), &config).unwrap();
        vault.unlock(MasterSecret::new(MASTER)).await.unwrap();

        let transport = Arc::new(HttpTransport::new().unwrap());
        let engine = RemoteSyncEngine::new(transport, vault.store().clone());
        engine.authorize(&relay.url, "alice", "secret").await.unwrap();

        Self { vault, engine }
    }

    fn logins(&self) -> Vec<String> {
        self.vault
            .sites()
            .unwrap()
            .into_iter()
            .filter_map(|r| r.decrypted.map(|s| s.login))
            .collect()
    }

    fn token(&self) -> String {
        self.engine.state_store().load().unwrap().unwrap().token
    }
}

fn site(login: &str) -> SiteRecord {
    SiteRecord {
        domain: "example.com".to_string(),
        login: login.to_string(),
        revision: 1,
        allowed_chars: "a-z0-9".to_string(),
        required_chars: "0-9".to_string(),
        password_len: 20,
    }
}

#[tokio::test]
async fn test_devices_converge_through_relay() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let a = Device::linked(&relay).await;
    let b = Device::linked(&relay).await;

    let id = a.vault.add_site(site("alice")).unwrap();
    a.vault.add_site(site("bob")).unwrap();
    let report = a.engine.run_cycle().await.unwrap();
    assert_eq!(report.pushed, 2);

    let report = b.engine.run_cycle().await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.applied, 2);
    assert_eq!(b.logins(), vec!["alice", "bob"]);
    assert_eq!(
        b.vault.password_for(&id).await.unwrap(),
        a.vault.password_for(&id).await.unwrap()
    );

    b.vault.remove_site(&id).unwrap();
    b.engine.run_cycle().await.unwrap();
    a.engine.run_cycle().await.unwrap();
    assert_eq!(a.logins(), vec!["bob"]);

    // Every object the relay holds is ciphertext
    let stored = relay.storage.objects_since("alice", 0).unwrap();
    assert_eq!(stored.len(), 2);
    for object in stored {
        let text = object.data.to_string();
        assert!(!text.contains("example.com"));
        assert!(!text.contains("bob"));
    }

    let status = a.engine.status().unwrap();
    assert!(status.linked);
    assert!(status.last_synced_at.unwrap() > 0);
}

#[tokio::test]
async fn test_unlink_revokes_token() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let device = Device::linked(&relay).await;
    let token = device.token();
    assert!(relay.storage.token_user(&token).unwrap().is_some());

    device.engine.unlink().await.unwrap();
    assert!(relay.storage.token_user(&token).unwrap().is_none());
    assert!(matches!(
        device.engine.run_cycle().await,
        Err(SyncError::NotLinked)
    ));
}

#[tokio::test]
async fn test_revoked_token_unlinks_device() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let device = Device::linked(&relay).await;
    relay
        .storage
        .delete_token("alice", &device.token())
        .unwrap();

    assert!(matches!(
        device.engine.run_cycle().await,
        Err(SyncError::Auth(401))
    ));
    assert!(!device.engine.status().unwrap().linked);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let transport = Arc::new(HttpTransport::new().unwrap());
    let engine = RemoteSyncEngine::new(
        transport,
        Vault::open(Arc::new(MemoryStorage::new()), &ClientConfig::default())
            .unwrap()
            .store()
            .clone(),
    );

    assert!(matches!(
        engine.authorize(&relay.url, "alice", "wrong").await,
        Err(SyncError::Auth(401))
    ));
    assert!(matches!(
        engine.authorize(&relay.url, "mallory", "secret").await,
        Err(SyncError::Auth(401))
    ));
    assert!(!engine.status().unwrap().linked);
}

#[tokio::test]
async fn test_http_surface_errors() {
    let relay = spawn_relay(RelayConfig {
        max_payload_size: 1024,
        ..RelayConfig::default()
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/objects", relay.url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    let resp = client
        .get(format!("{}/objects", relay.url))
        .bearer_auth("0000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let token: serde_json::Value = client
        .put(format!("{}/user/token", relay.url))
        .basic_auth("alice", Some("secret"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = token["token"].as_str().unwrap().to_string();

    let resp = client
        .put(format!("{}/objects", relay.url))
        .bearer_auth(&token)
        .json(&json!({"objects": [{"id": "a", "data": "not an object"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .put(format!("{}/objects", relay.url))
        .bearer_auth(&token)
        .json(&json!({"objects": [{"id": "a", "data": {"blob": "x".repeat(4096)}}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let resp: serde_json::Value = client
        .put(format!("{}/objects", relay.url))
        .bearer_auth(&token)
        .json(&json!({"objects": [{"id": "a", "data": {"id": "a"}}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let stamp = resp["modifiedAt"].as_i64().unwrap();

    let fetched: serde_json::Value = client
        .get(format!("{}/objects", relay.url))
        .query(&[("since", stamp - 1)])
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["objects"][0]["modifiedAt"], stamp);
    assert_eq!(fetched["objects"][0]["data"]["id"], "a");

    let resp = client
        .delete(format!("{}/user/token", relay.url))
        .bearer_auth(&token)
        .json(&json!({ "token": token }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(relay.storage.token_user(&token).unwrap().is_none());
}
