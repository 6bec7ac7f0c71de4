use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::reply::Reply;
use warp::Filter;

use super::websocket;
use crate::error::ProctorError;
use crate::proctoring::{
    check_compatibility, ClientReport, FeatureSupport, ProcessKind, ProcessStatus,
    ProctorManager, ReportedProbe, SessionHost, Severity, TerminationKind, ViolationType,
};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub student_id: String,
    pub quiz_id: String,
    pub session_id: String,
    #[serde(default)]
    pub report: Option<ClientReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRequest {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[serde(rename = "type")]
    pub process_type: ProcessKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUpdateRequest {
    #[serde(rename = "type")]
    pub process_type: ProcessKind,
    pub status: ProcessStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateRequest {
    pub student_id: String,
    pub quiz_id: String,
    #[serde(default)]
    pub termination_type: Option<TerminationKind>,
}

/// Every proctoring route under `/proctoring`.
pub fn routes(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    proctor_websocket_route(manager.clone())
        .or(health_check(manager.clone()))
        .or(compatibility_endpoint())
        .or(create_session(manager.clone()))
        .or(record_violation(manager.clone()))
        .or(register_process(manager.clone()))
        .or(update_process(manager.clone()))
        .or(terminate_session(manager))
}

pub fn proctor_websocket_route(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "ws")
        .and(warp::ws())
        .and(with_manager(manager))
        .map(|ws: warp::ws::Ws, manager: Arc<ProctorManager>| {
            ws.on_upgrade(move |websocket| websocket::handle_proctor_websocket(websocket, manager))
        })
}

pub fn health_check(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "health")
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(|manager: Arc<ProctorManager>| async move {
            let storage_available = manager.storage_available().await;
            Ok::<_, Infallible>(warp::reply::json(&serde_json::json!({
                "status": if storage_available { "healthy" } else { "degraded" },
                "service": "Proctoring Session Service",
                "version": env!("CARGO_PKG_VERSION"),
                "activeSessions": manager.active_sessions().await,
                "storageAvailable": storage_available
            })))
        })
}

pub fn compatibility_endpoint(
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "compatibility")
        .and(warp::post())
        .and(json_body::<FeatureSupport>())
        .map(|support: FeatureSupport| warp::reply::json(&check_compatibility(&support)))
}

pub fn create_session(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "sessions")
        .and(warp::post())
        .and(json_body::<CreateSessionRequest>())
        .and(with_manager(manager))
        .and_then(handle_create_session)
}

pub fn record_violation(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / String / "violations")
        .and(warp::post())
        .and(json_body::<ViolationRequest>())
        .and(with_manager(manager))
        .and_then(handle_record_violation)
}

pub fn register_process(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / String / "processes")
        .and(warp::post())
        .and(json_body::<ProcessRequest>())
        .and(with_manager(manager))
        .and_then(handle_register_process)
}

pub fn update_process(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / String / "processes")
        .and(warp::patch())
        .and(json_body::<ProcessUpdateRequest>())
        .and(with_manager(manager))
        .and_then(handle_update_process)
}

pub fn terminate_session(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / String / "terminate")
        .and(warp::post())
        .and(json_body::<TerminateRequest>())
        .and(with_manager(manager))
        .and_then(handle_terminate_session)
}

async fn handle_create_session(
    request: CreateSessionRequest,
    manager: Arc<ProctorManager>,
) -> Result<warp::reply::Response, Infallible> {
    // REST clients enforce lockdown and storage cleanup themselves
    let probe = Arc::new(ReportedProbe::new(request.report.unwrap_or_default()));
    let host = SessionHost::detached(probe);

    match manager
        .initialize(&request.student_id, &request.quiz_id, &request.session_id, host)
        .await
    {
        Ok(session) => Ok(
            warp::reply::with_status(warp::reply::json(&session), StatusCode::CREATED)
                .into_response(),
        ),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_record_violation(
    session_id: String,
    request: ViolationRequest,
    manager: Arc<ProctorManager>,
) -> Result<warp::reply::Response, Infallible> {
    match manager
        .record_violation(
            &session_id,
            request.violation_type,
            request.severity,
            &request.description,
            request.metadata,
        )
        .await
    {
        Ok(event) => Ok(
            warp::reply::with_status(warp::reply::json(&event), StatusCode::CREATED)
                .into_response(),
        ),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_register_process(
    session_id: String,
    request: ProcessRequest,
    manager: Arc<ProctorManager>,
) -> Result<warp::reply::Response, Infallible> {
    match manager
        .register_process(&session_id, request.process_type)
        .await
    {
        Ok(process) => Ok(
            warp::reply::with_status(warp::reply::json(&process), StatusCode::CREATED)
                .into_response(),
        ),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_update_process(
    session_id: String,
    request: ProcessUpdateRequest,
    manager: Arc<ProctorManager>,
) -> Result<warp::reply::Response, Infallible> {
    match manager
        .update_process(&session_id, request.process_type, request.status)
        .await
    {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_terminate_session(
    session_id: String,
    request: TerminateRequest,
    manager: Arc<ProctorManager>,
) -> Result<warp::reply::Response, Infallible> {
    let result = manager
        .terminate_with(
            &request.student_id,
            &request.quiz_id,
            &session_id,
            request.termination_type.unwrap_or(TerminationKind::Normal),
        )
        .await;
    Ok(warp::reply::json(&result).into_response())
}

fn error_reply(error: &ProctorError) -> warp::reply::Response {
    let status = match error {
        ProctorError::SessionNotFound(_) | ProctorError::ProcessNotRegistered(_) => {
            StatusCode::NOT_FOUND
        }
        ProctorError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
        ProctorError::SessionAlreadyExists(_) | ProctorError::SessionNotActive(_) => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": error.to_string() })),
        status,
    )
    .into_response()
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn with_manager(
    manager: Arc<ProctorManager>,
) -> impl Filter<Extract = (Arc<ProctorManager>,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}
