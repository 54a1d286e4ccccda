use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::routing::post;
use time::OffsetDateTime;

use opencompat_store::{CredentialStore, OAuthConfig, OAuthCredentials};

async fn token_endpoint(State(hits): State<Arc<AtomicUsize>>) -> axum::Json<serde_json::Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    axum::Json(serde_json::json!({
        "access_token": "refreshed-access",
        "refresh_token": "refreshed-refresh",
        "token_type": "bearer",
        "expires_in": 3600,
    }))
}

#[tokio::test]
async fn concurrent_refreshes_collapse_into_one_token_call() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/oauth/token", post(token_endpoint))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let dir = std::env::temp_dir().join(format!("opencompat-coalesce-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let store = Arc::new(CredentialStore::with_data_dir(dir));

    let expired = OAuthCredentials {
        r#type: String::new(),
        access_token: "stale-access".to_string(),
        refresh_token: "stale-refresh".to_string(),
        id_token: String::new(),
        expires_at: OffsetDateTime::now_utc().unix_timestamp() - 10,
        account_id: String::new(),
        email: String::new(),
    };
    store.save_oauth("chatgpt", &expired).expect("seed");

    let cfg = Arc::new(OAuthConfig {
        token_url: format!("http://{addr}/oauth/token"),
        client_id: "client-1".to_string(),
        ..Default::default()
    });

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let cfg = cfg.clone();
        tasks.push(tokio::spawn(async move {
            store.get_oauth_refreshed("chatgpt", &cfg).await
        }));
    }

    for task in tasks {
        let creds = task.await.expect("join").expect("refreshed");
        assert_eq!(creds.access_token, "refreshed-access");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1, "exactly one refresh POST");
}
