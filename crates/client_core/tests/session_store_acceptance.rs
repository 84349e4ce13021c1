use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use client_core::{
    ClientConfig, RestBackend, SearchController, SearchHistory, SearchStatus, SessionManager,
    SessionStatus,
};
use storage::{SecretStore, Storage, AUTH_TOKEN_KEY};

async fn serve(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn backend(base: &str) -> Arc<RestBackend> {
    let mut config = ClientConfig::default();
    config.api_base = base.to_string();
    config.oauth_base = base.to_string();
    Arc::new(RestBackend::new(&config))
}

async fn handle_user(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some("Bearer acceptance-token");
    if authorized {
        (StatusCode::OK, Json(json!({"id": 1, "login": "octocat"})))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Bad credentials"})),
        )
    }
}

async fn handle_search(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    assert!(params.contains_key("q"), "search must carry a query");
    Json(json!({
        "total_count": 1,
        "incomplete_results": false,
        "items": [{
            "id": 1,
            "name": "rust",
            "full_name": "rust-lang/rust",
            "owner": {"login": "rust-lang"},
            "html_url": "https://github.com/rust-lang/rust"
        }]
    }))
}

#[tokio::test]
async fn sign_in_search_and_sign_out_share_the_real_store() {
    let app = Router::new()
        .route("/user", get(handle_user))
        .route("/search/repositories", get(handle_search));
    let base = serve(app).await;

    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("store"));
    let backend = backend(&base);

    let session = SessionManager::new(backend.clone(), storage.clone());
    let account = session
        .login("acceptance-token".to_string())
        .await
        .expect("login");
    assert_eq!(account.login, "octocat");
    assert_eq!(
        storage
            .get_secret(AUTH_TOKEN_KEY)
            .await
            .expect("stored token")
            .as_deref(),
        Some("acceptance-token")
    );

    // A fresh manager over the same store picks the session up again.
    let restored = SessionManager::new(backend.clone(), storage.clone());
    restored.restore().await.expect("restore");
    assert_eq!(restored.state().status, SessionStatus::Authenticated);
    assert!(restored.is_authenticated().await.expect("recheck"));

    let history = Arc::new(SearchHistory::load(storage.clone()).await.expect("history"));
    let search = Arc::new(SearchController::new(
        backend,
        Arc::clone(&history),
        20,
        Duration::from_millis(25),
    ));
    let mut rx = search.subscribe();
    search
        .search_with_history("rust")
        .await
        .expect("record query");

    let settled = tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| s.status == SearchStatus::Success && !s.results.is_empty()),
    )
    .await
    .expect("search settled")
    .expect("controller alive")
    .clone();
    assert_eq!(settled.results.len(), 1);
    assert_eq!(settled.results[0].full_name, "rust-lang/rust");
    assert_eq!(history.entries(), ["rust"]);

    restored.logout().await.expect("logout");
    assert_eq!(
        storage.get_secret(AUTH_TOKEN_KEY).await.expect("cleared"),
        None
    );
}

#[tokio::test]
async fn a_rejected_stored_token_clears_the_store_on_recheck() {
    let app = Router::new().route(
        "/user",
        get(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"message": "Bad credentials"}))) }),
    );
    let base = serve(app).await;

    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("store"));
    storage
        .set_secret(AUTH_TOKEN_KEY, "stale-token")
        .await
        .expect("seed");

    let session = SessionManager::new(backend(&base), storage.clone());
    session.restore().await.expect("restore");
    assert_eq!(session.state().status, SessionStatus::Authenticated);

    assert!(!session.is_authenticated().await.expect("recheck"));
    assert_eq!(session.state().status, SessionStatus::Unauthenticated);
    assert_eq!(
        storage.get_secret(AUTH_TOKEN_KEY).await.expect("cleared"),
        None
    );
}
