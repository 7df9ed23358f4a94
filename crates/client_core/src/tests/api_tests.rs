use super::*;
use crate::{
    notice::{NoticeKind, SESSION_NOTICE_DURATION},
    session::Session,
};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode as HttpStatus},
    routing::{delete, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::{ServiceType, StationId, UserId, UserRole, VehicleId};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::Mutex as AsyncMutex};

#[derive(Clone)]
struct FakeBackend {
    valid_token: Arc<AsyncMutex<String>>,
    refresh_succeeds: bool,
    grant_on_refresh: bool,
    refresh_calls: Arc<AtomicUsize>,
    authorized_calls: Arc<AtomicUsize>,
    last_body: Arc<AsyncMutex<Option<Value>>>,
}

impl FakeBackend {
    fn new(valid_token: &str) -> Self {
        Self {
            valid_token: Arc::new(AsyncMutex::new(valid_token.to_string())),
            refresh_succeeds: true,
            grant_on_refresh: true,
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            authorized_calls: Arc::new(AtomicUsize::new(0)),
            last_body: Arc::new(AsyncMutex::new(None)),
        }
    }
}

async fn guarded(
    State(state): State<FakeBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (HttpStatus, Json<Value>) {
    state.authorized_calls.fetch_add(1, Ordering::SeqCst);
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let expected = format!("Bearer {}", state.valid_token.lock().await);
    if presented != expected {
        return (
            HttpStatus::UNAUTHORIZED,
            Json(json!({"message": "Token has expired"})),
        );
    }
    *state.last_body.lock().await = Some(body);
    (HttpStatus::OK, Json(json!({"message": "ok"})))
}

async fn refresh(
    State(state): State<FakeBackend>,
    Json(body): Json<Value>,
) -> (HttpStatus, Json<Value>) {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["refresh"], "refresh-1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    if !state.refresh_succeeds {
        return (
            HttpStatus::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "Invalid refresh token"})),
        );
    }
    if state.grant_on_refresh {
        *state.valid_token.lock().await = "fresh-token".into();
    }
    (HttpStatus::OK, Json(json!({"access_token": "fresh-token"})))
}

async fn login(Json(body): Json<Value>) -> (HttpStatus, Json<Value>) {
    if body["password"] != "correct horse" {
        return (
            HttpStatus::BAD_REQUEST,
            Json(json!({"message": "Invalid password"})),
        );
    }
    (
        HttpStatus::OK,
        Json(json!({
            "message": "Login successful",
            "user": {"user_id": 11, "email": body["email"], "name": "Rae", "role": "RESPONDER"},
            "access_token": "access-1",
            "refresh_token": "refresh-1"
        })),
    )
}

async fn report(Json(body): Json<Value>) -> (HttpStatus, Json<Value>) {
    if body.get("description").is_none() {
        return (
            HttpStatus::BAD_REQUEST,
            Json(json!({"message": "Missing required field: description"})),
        );
    }
    (HttpStatus::OK, Json(json!({"message": "Incident reported"})))
}

async fn spawn_backend(state: FakeBackend) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let app = Router::new()
        .route("/login/", post(login))
        .route("/refresh-token/", post(refresh))
        .route("/incidents/report/", post(report))
        .route("/admin/vehicles/create/", post(guarded))
        .route("/admin/vehicles/delete/", delete(guarded))
        .route("/change-password/", post(guarded))
        .route("/admin/stations/create/", post(guarded))
        .route("/admin/users/create/", post(guarded))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn session_with(access: &str) -> SessionContext {
    SessionContext::in_memory(Session {
        access_token: Some(access.into()),
        refresh_token: Some("refresh-1".into()),
        user_role: Some(UserRole::Admin),
        user_id: Some(UserId(1)),
    })
}

fn rest_client(
    api_url: String,
    session: SessionContext,
) -> (RestClient, broadcast::Receiver<ClientEvent>) {
    let (events, receiver) = broadcast::channel(16);
    let settings = ClientSettings::default().with_api_url(api_url);
    (RestClient::new(settings, session, events), receiver)
}

fn vehicle_body() -> CreateVehicleBody {
    CreateVehicleBody {
        station_id: StationId(2),
        capacity: 4,
        lat: 14.6,
        lng: 121.0,
    }
}

#[tokio::test]
async fn login_establishes_session() {
    let api_url = spawn_backend(FakeBackend::new("unused")).await;
    let session = SessionContext::in_memory(Session::default());
    let (client, _events) = rest_client(api_url, session.clone());

    let response = client
        .login("rae@example.org", "correct horse")
        .await
        .expect("login");

    assert_eq!(response.user.role, UserRole::Responder);
    assert_eq!(session.access_token().await.as_deref(), Some("access-1"));
    assert_eq!(session.refresh_token().await.as_deref(), Some("refresh-1"));
    assert_eq!(session.user_id().await, Some(UserId(11)));
}

#[tokio::test]
async fn failed_login_forwards_server_message() {
    let api_url = spawn_backend(FakeBackend::new("unused")).await;
    let session = SessionContext::in_memory(Session::default());
    let (client, _events) = rest_client(api_url, session.clone());

    let err = client
        .login("rae@example.org", "wrong")
        .await
        .expect_err("bad password");

    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "server error: Invalid password");
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn public_report_needs_no_session() {
    let api_url = spawn_backend(FakeBackend::new("unused")).await;
    let (client, _events) = rest_client(api_url, SessionContext::in_memory(Session::default()));

    let response = client
        .report_incident(&ReportIncidentBody {
            incident_type: shared::domain::ServiceType::Medical,
            severity_level: shared::domain::SeverityLevel::High,
            lat: 14.6,
            lng: 121.0,
            description: "Collapsed pedestrian".into(),
        })
        .await
        .expect("report");
    assert_eq!(response.message, "Incident reported");
}

#[tokio::test]
async fn authorized_call_without_token_is_rejected_locally() {
    let backend = FakeBackend::new("access-1");
    let calls = Arc::clone(&backend.authorized_calls);
    let api_url = spawn_backend(backend).await;
    let (client, _events) = rest_client(api_url, SessionContext::in_memory(Session::default()));

    let err = client
        .create_vehicle(&vehicle_body())
        .await
        .expect_err("no token");
    assert!(matches!(err, ApiCallError::Unauthenticated));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let backend = FakeBackend::new("fresh-token");
    let refresh_calls = Arc::clone(&backend.refresh_calls);
    let authorized_calls = Arc::clone(&backend.authorized_calls);
    let api_url = spawn_backend(backend).await;
    let session = session_with("stale-token");
    let (client, _events) = rest_client(api_url, session.clone());

    let body = vehicle_body();
    let removal = DeleteVehicleBody {
        vehicle_id: VehicleId(9),
    };
    let (created, deleted) = tokio::join!(
        client.create_vehicle(&body),
        client.delete_vehicle(&removal)
    );

    assert_eq!(created.expect("create after refresh").message, "ok");
    assert_eq!(deleted.expect("delete after refresh").message, "ok");
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert!(authorized_calls.load(Ordering::SeqCst) <= 4);
    assert_eq!(session.access_token().await.as_deref(), Some("fresh-token"));
    assert_eq!(session.refresh_token().await.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn retry_happens_at_most_once() {
    let mut backend = FakeBackend::new("never-issued");
    backend.grant_on_refresh = false;
    let refresh_calls = Arc::clone(&backend.refresh_calls);
    let authorized_calls = Arc::clone(&backend.authorized_calls);
    let api_url = spawn_backend(backend).await;
    let (client, _events) = rest_client(api_url, session_with("stale-token"));

    let err = client
        .change_password("new secret")
        .await
        .expect_err("still unauthorized");

    assert_eq!(err.status(), Some(401));
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(authorized_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn refresh_failure_clears_session_and_emits_expiry() {
    let mut backend = FakeBackend::new("fresh-token");
    backend.refresh_succeeds = false;
    let api_url = spawn_backend(backend).await;
    let session = session_with("stale-token");
    let (client, mut events) = rest_client(api_url, session.clone());

    let err = client
        .create_vehicle(&vehicle_body())
        .await
        .expect_err("session expired");

    assert!(matches!(err, ApiCallError::SessionExpired));
    assert!(session.snapshot().await.is_empty());
    assert!(matches!(
        events.try_recv().expect("expiry event"),
        ClientEvent::SessionExpired
    ));
    match events.try_recv().expect("expiry notice") {
        ClientEvent::Notice(notice) => {
            assert_eq!(notice.kind, NoticeKind::Session);
            assert_eq!(notice.duration, SESSION_NOTICE_DURATION);
        }
        other => panic!("expected a session notice, got {other:?}"),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn forced_refresh_rotates_the_access_token() {
    let backend = FakeBackend::new("fresh-token");
    let refresh_calls = Arc::clone(&backend.refresh_calls);
    let api_url = spawn_backend(backend).await;
    let session = session_with("stale-token");
    let (client, _events) = rest_client(api_url, session.clone());

    let token = client.refresh_access_token().await.expect("refresh");

    assert_eq!(token, "fresh-token");
    assert_eq!(session.access_token().await.as_deref(), Some("fresh-token"));
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn forced_refresh_needs_a_session() {
    let api_url = spawn_backend(FakeBackend::new("unused")).await;
    let (client, _events) = rest_client(api_url, SessionContext::in_memory(Session::default()));

    let err = client
        .refresh_access_token()
        .await
        .expect_err("no session");
    assert!(matches!(err, ApiCallError::Unauthenticated));
}

#[tokio::test]
async fn admin_creates_station_and_user() {
    let backend = FakeBackend::new("access-1");
    let last_body = Arc::clone(&backend.last_body);
    let api_url = spawn_backend(backend).await;
    let (client, _events) = rest_client(api_url, session_with("access-1"));

    client
        .create_station(&CreateStationBody {
            station_type: ServiceType::Fire,
            zone: "North".into(),
            lat: 14.6,
            lng: 121.0,
        })
        .await
        .expect("create station");
    let station = last_body.lock().await.clone().expect("station body");
    assert_eq!(station["type"], "FIRE");
    assert_eq!(station["zone"], "North");

    client
        .create_user(&CreateUserBody {
            email: "unit7@example.org".into(),
            password: "temporary".into(),
            name: "Unit Seven".into(),
            role: UserRole::Responder,
        })
        .await
        .expect("create user");
    assert_eq!(
        last_body.lock().await.clone(),
        Some(json!({
            "email": "unit7@example.org",
            "password": "temporary",
            "name": "Unit Seven",
            "role": "RESPONDER"
        }))
    );
}

#[tokio::test]
async fn request_body_reaches_backend_after_refresh() {
    let backend = FakeBackend::new("fresh-token");
    let last_body = Arc::clone(&backend.last_body);
    let api_url = spawn_backend(backend).await;
    let (client, _events) = rest_client(api_url, session_with("stale-token"));

    client
        .change_password("new secret")
        .await
        .expect("change password");

    assert_eq!(
        last_body.lock().await.clone(),
        Some(json!({"new_password": "new secret"}))
    );
}
