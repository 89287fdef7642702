use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use scheduler_agent::AgentHost;
use scheduler_core::{AgentConfig, AgentError, AgentEvent, ConnectionState};
use serde_json::{json, Value};
use tempfile::TempDir;

async fn mock_coordinator() -> String {
    let app = Router::new()
        .route(
            "/auth/login",
            post(|Json(body): Json<Value>| async move {
                if body["password"] == "secret" {
                    (
                        StatusCode::OK,
                        Json(json!({"token": "tok-1", "refreshToken": "ref-1"})),
                    )
                } else {
                    (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad credentials"})))
                }
            }),
        )
        .route(
            "/workers/register",
            post(|| async { Json(json!({"workerId": "host-worker-1"})) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config_for(base_url: &str) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.coordinator.base_url = base_url.to_string();
    config.agent.shutdown_grace_seconds = 1;
    config.agent.reconnect_delay_seconds = 1;
    config.tools.codex.enabled = false;
    config.tools.gemini.enabled = false;
    config.tools.ollama.enabled = false;
    config
}

#[tokio::test]
async fn test_save_settings_persists_and_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("agent.toml");
    let host = AgentHost::new(AgentConfig::default(), &path).unwrap();

    let mut settings = host.get_settings().await;
    settings.coordinator.base_url = "https://coord.example.com/api".to_string();
    settings.agent.poll_interval_seconds = 20;
    host.save_settings(settings.clone()).await.unwrap();

    assert_eq!(host.get_settings().await, settings);
    let on_disk = AgentConfig::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(on_disk.coordinator.base_url, "https://coord.example.com/api");
    assert_eq!(on_disk.agent.poll_interval_seconds, 20);
}

#[tokio::test]
async fn test_invalid_settings_are_not_saved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent.toml");
    let host = AgentHost::new(AgentConfig::default(), &path).unwrap();

    let mut settings = host.get_settings().await;
    settings.logging.format = "xml".to_string();

    assert!(host.save_settings(settings).await.is_err());
    assert!(!path.exists());
    assert_eq!(host.get_settings().await.logging.format, "pretty");
}

#[tokio::test]
async fn test_start_without_login_reports_error_state() {
    let base = mock_coordinator().await;
    let dir = TempDir::new().unwrap();
    let host = AgentHost::new(config_for(&base), dir.path().join("agent.toml")).unwrap();
    let mut events = host.subscribe();

    let err = host.start_worker().await.unwrap_err();
    assert!(matches!(err, AgentError::NotAuthenticated));
    assert_eq!(host.get_worker_status().await.state, ConnectionState::Error);

    let mut saw_error_state = false;
    let mut saw_error_log = false;
    while let Ok(event) = events.try_recv() {
        match event {
            AgentEvent::StatusChanged { state } if state == ConnectionState::Error => {
                saw_error_state = true
            }
            AgentEvent::LogEmitted { message, .. } if message.contains("failed to start") => {
                saw_error_log = true
            }
            _ => {}
        }
    }
    assert!(saw_error_state);
    assert!(saw_error_log);

    host.stop_worker().await.unwrap();
    assert_eq!(
        host.get_worker_status().await.state,
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_login_and_logout_manage_session() {
    let base = mock_coordinator().await;
    let dir = TempDir::new().unwrap();
    let host = AgentHost::new(config_for(&base), dir.path().join("agent.toml")).unwrap();

    let rejected = host.login("operator", "wrong").await.unwrap_err();
    assert!(matches!(rejected, AgentError::Authentication(_)));
    assert!(!host.supervisor().session().is_authenticated());

    let login = host.login("operator", "secret").await.unwrap();
    assert_eq!(login.token, "tok-1");
    assert_eq!(login.refresh_token.as_deref(), Some("ref-1"));
    assert!(host.supervisor().session().is_authenticated());
    assert!(host.supervisor().session().has_refresh_token());

    host.logout().await.unwrap();
    assert!(!host.supervisor().session().is_authenticated());
    assert!(!host.supervisor().session().has_refresh_token());
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_lifecycle_through_host() {
    let base = mock_coordinator().await;
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&base);
    // `true --version` exits 0, which is all the probe needs.
    config.tools.claude_code.binary = "true".to_string();
    let host = AgentHost::new(config, dir.path().join("agent.toml")).unwrap();

    host.login("operator", "secret").await.unwrap();
    host.start_worker().await.unwrap();

    let status = host.get_worker_status().await;
    assert_eq!(status.state, ConnectionState::Online);
    assert_eq!(status.worker_id.as_deref(), Some("host-worker-1"));
    assert_eq!(status.current_task, None);
    assert!(status
        .capabilities
        .iter()
        .any(|c| c.id == "claude-code" && c.available));

    tokio::time::timeout(Duration::from_secs(5), host.logout())
        .await
        .unwrap()
        .unwrap();
    let status = host.get_worker_status().await;
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!host.supervisor().is_running().await);
}
