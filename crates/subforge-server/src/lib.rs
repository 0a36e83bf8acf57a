//! Subforge Server - HTTP API server.
//!
//! This crate exposes the [`ConfigService`] entry points over HTTP.
//!
//! ## Endpoints
//!
//! - `GET|POST /api/subscriptions` - List / create (downloads and ingests immediately)
//! - `POST /api/subscriptions/{id}/refresh` - Queue a refresh
//! - `DELETE /api/subscriptions/{id}` - Delete a subscription and its nodes
//! - `GET /api/nodes`, `POST /api/nodes/probe` - Nodes and TCP latency
//! - `GET|POST /api/groups`, `PUT|DELETE /api/groups/{id}`, `GET /api/groups/members`
//! - `GET /api/rulesets`, `PUT /api/rulesets/{tag}`, `POST /api/rulesets/{tag}/refresh`
//! - `GET|PUT /api/settings`
//! - `POST /api/config/generate` - Assemble and write the document
//!
//! ## Example
//!
//! ```no_run
//! use subforge_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::new(ServerConfig::default()).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use subforge_core::ConfigService;
use subforge_storage::Database;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 9876;

/// Default server host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 9876).
    pub port: u16,
    /// Database path (None = in-memory).
    pub db_path: Option<PathBuf>,
    /// Directory rule-set files are downloaded to.
    pub rule_set_dir: PathBuf,
    /// Where generated documents are written.
    pub output_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db_path: None,
            rule_set_dir: PathBuf::from("rules"),
            output_path: PathBuf::from("config.json"),
        }
    }
}

impl ServerConfig {
    /// Creates a config with a specific database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the rule-set directory and output path.
    pub fn with_paths(
        mut self,
        rule_set_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        self.rule_set_dir = rule_set_dir.into();
        self.output_path = output_path.into();
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] subforge_storage::StorageError),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route(
            "/api/subscriptions/{id}",
            axum::routing::delete(handlers::delete_subscription),
        )
        .route(
            "/api/subscriptions/{id}/refresh",
            post(handlers::refresh_subscription),
        )
        .route("/api/nodes", get(handlers::list_nodes))
        .route("/api/nodes/probe", post(handlers::probe_nodes))
        .route(
            "/api/groups",
            get(handlers::list_groups).post(handlers::create_group),
        )
        .route("/api/groups/members", get(handlers::group_members))
        .route(
            "/api/groups/{id}",
            put(handlers::update_group).delete(handlers::delete_group),
        )
        .route("/api/rulesets", get(handlers::list_rule_sets))
        .route("/api/rulesets/{tag}", put(handlers::toggle_rule_set))
        .route("/api/rulesets/{tag}/refresh", post(handlers::refresh_rule_set))
        .route(
            "/api/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route("/api/config/generate", post(handlers::generate_config))
        .layer(cors)
        .with_state(state)
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a new server with the given configuration.
    ///
    /// Must be called inside a Tokio runtime; the refresh worker is spawned here.
    pub async fn new(config: ServerConfig) -> std::result::Result<Self, ServerError> {
        let db = match config.db_path {
            Some(ref path) => Database::with_path(path)?,
            None => Database::in_memory()?,
        };

        let service = ConfigService::new(
            Arc::new(db),
            config.rule_set_dir.clone(),
            config.output_path.clone(),
        );
        Self::with_state(config, AppState::new(Arc::new(service)))
    }

    /// Creates a server with custom application state.
    pub fn with_state(
        config: ServerConfig,
        state: AppState,
    ) -> std::result::Result<Self, ServerError> {
        let router = router(state);

        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self { router, addr })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server until shutdown.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        info!("Starting Subforge API server on {}", self.addr);

        let domain = if self.addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Allow rebinding while old sockets linger in TIME_WAIT
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        socket
            .bind(&self.addr.into())
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .listen(128)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Set non-blocking for tokio
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        axum::serve(listener, self.router)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use subforge_core::subscription::content_hash;
    use subforge_core::{ConfigStore, MemoryStore, NewSubscription, SubscriptionType};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    const BODY: &str = "\
trojan://secret@hk1.example.com:443#香港 HK-01
trojan://secret@jp1.example.com:443#日本 JP-01
";

    struct TestApp {
        app: Router,
        store: Arc<MemoryStore>,
        dir: TempDir,
    }

    fn create_test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let service = ConfigService::new(
            store.clone(),
            dir.path().join("rules"),
            dir.path().join("config.json"),
        );
        let app = router(AppState::new(Arc::new(service)));
        TestApp { app, store, dir }
    }

    /// Serves `BODY` over HTTP on a loopback port. Returns the subscription URL.
    async fn serve_body() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    BODY.len(),
                    BODY
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/sub", addr)
    }

    /// Seeds one subscription with nodes, bypassing the network.
    fn seed(store: &MemoryStore) -> i64 {
        seed_with_url(store, "https://example.com/sub")
    }

    fn seed_with_url(store: &MemoryStore, url: &str) -> i64 {
        let sub = store
            .create_subscription(NewSubscription {
                name: "main".into(),
                url: url.into(),
            })
            .unwrap();
        let registry = subforge_core::ProtocolRegistry::with_defaults();
        let (_, nodes) = subforge_core::SubscriptionIngestor::new(&registry)
            .ingest(BODY)
            .unwrap();
        store
            .replace_nodes(sub.id, SubscriptionType::V2rayText, "h", &nodes)
            .unwrap();
        sub.id
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_list_nodes() {
        let t = create_test_app();
        seed(&t.store);

        let (status, json) = send(&t.app, "GET", "/api/nodes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 2);
        assert_eq!(json["nodes"][0]["type"], "trojan");
    }

    #[tokio::test]
    async fn test_list_subscriptions() {
        let t = create_test_app();
        seed(&t.store);

        let (status, json) = send(&t.app, "GET", "/api/subscriptions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["subscriptions"][0]["node_count"], 2);
    }

    #[tokio::test]
    async fn test_create_subscription_rejects_bad_url() {
        let t = create_test_app();
        let (status, json) = send(
            &t.app,
            "POST",
            "/api/subscriptions",
            Some(json!({"name": "x", "url": "ftp://example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_refresh_unknown_subscription() {
        let t = create_test_app();
        let (status, json) = send(&t.app, "POST", "/api/subscriptions/42/refresh", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "not_found");
    }

    #[tokio::test]
    async fn test_refresh_is_accepted() {
        let t = create_test_app();
        let url = serve_body().await;
        let id = seed_with_url(&t.store, &url);
        let uri = format!("/api/subscriptions/{}/refresh", id);
        let (status, json) = send(&t.app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["queued"], true);

        // The queued refresh fetches the loopback body and re-hashes it.
        let expected = content_hash(BODY.as_bytes());
        let mut refreshed = false;
        for _ in 0..100 {
            let sub = t.store.get_subscription(id).unwrap().unwrap();
            if sub.content_hash.as_deref() == Some(expected.as_str()) {
                refreshed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(refreshed);
    }

    #[tokio::test]
    async fn test_delete_subscription() {
        let t = create_test_app();
        let id = seed(&t.store);
        let uri = format!("/api/subscriptions/{}", id);

        let (status, _) = send(&t.app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&t.app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(t.store.get_nodes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_group_crud_and_members() {
        let t = create_test_app();
        seed(&t.store);

        let (status, created) = send(
            &t.app,
            "POST",
            "/api/groups",
            Some(json!({"name": "香港", "mode": "auto", "include_patterns": ["hk"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["active"], true);
        let id = created["id"].as_i64().unwrap();

        let (status, members) = send(&t.app, "GET", "/api/groups/members", None).await;
        assert_eq!(status, StatusCode::OK);
        let hk = members["groups"]
            .as_array()
            .unwrap()
            .iter()
            .find(|g| g["group"]["name"] == "香港")
            .unwrap();
        assert_eq!(hk["nodes"].as_array().unwrap().len(), 1);

        let uri = format!("/api/groups/{}", id);
        let (status, updated) = send(
            &t.app,
            "PUT",
            &uri,
            Some(json!({"name": "香港", "mode": "select", "include_patterns": ["jp"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["mode"], "select");

        let (status, _) = send(&t.app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, groups) = send(&t.app, "GET", "/api/groups", None).await;
        assert_eq!(groups["groups"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_group_is_conflict() {
        let t = create_test_app();
        let body = json!({"name": "日本", "include_patterns": ["jp"]});
        send(&t.app, "POST", "/api/groups", Some(body.clone())).await;
        let (status, json) = send(&t.app, "POST", "/api/groups", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "conflict");
    }

    #[tokio::test]
    async fn test_catch_all_group_cannot_be_deleted() {
        let t = create_test_app();
        let id = t.store.list_groups().unwrap()[0].id;
        let (status, _) = send(&t.app, "DELETE", &format!("/api/groups/{}", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_rule_set_toggle() {
        let t = create_test_app();
        let (status, json) = send(
            &t.app,
            "PUT",
            "/api/rulesets/geoip-cn",
            Some(json!({"enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["enabled"], false);

        let (status, _) = send(
            &t.app,
            "PUT",
            "/api/rulesets/missing",
            Some(json!({"enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, list) = send(&t.app, "GET", "/api/rulesets", None).await;
        assert!(!list["rule_sets"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let t = create_test_app();
        let (status, mut settings) = send(&t.app, "GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settings["inbound"]["mixed_port"], 7890);

        settings["inbound"]["mixed_port"] = json!(2080);
        let (status, _) = send(&t.app, "PUT", "/api/settings", Some(settings)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, settings) = send(&t.app, "GET", "/api/settings", None).await;
        assert_eq!(settings["inbound"]["mixed_port"], 2080);
    }

    #[tokio::test]
    async fn test_generate_config() {
        let t = create_test_app();
        seed(&t.store);

        let (status, json) = send(&t.app, "POST", "/api/config/generate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["outbounds"].as_array().unwrap().len() > 3);
        assert_eq!(json["route"]["final"], subforge_core::rule_set::NODE_SELECT);
        assert!(t.dir.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn test_probe_with_no_nodes() {
        let t = create_test_app();
        let (status, json) = send(&t.app, "POST", "/api/nodes/probe", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.db_path.is_none());
    }

    #[tokio::test]
    async fn test_server_config_with_port() {
        let config = ServerConfig::default().with_port(9000);
        assert_eq!(config.port, 9000);
    }

    #[tokio::test]
    async fn test_server_with_in_memory_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default()
            .with_port(0)
            .with_paths(dir.path().join("rules"), dir.path().join("out.json"));
        let server = Server::new(config).await.unwrap();
        assert_eq!(server.addr().port(), 0);

        let (status, json) = send(&server.router(), "GET", "/api/groups", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["groups"].as_array().unwrap().len(), 1);
    }
}
