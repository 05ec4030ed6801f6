use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::axis::{ActuatorHealth, AxisController};
use crate::board::{BoardGeometry, Square};
use crate::config::ConfigManager;
use crate::error::RigError;
use crate::gripper::{GripperController, SerialReport};
use crate::messages::{
    ConfigResponse, ConfigUpdateRequest, HomeRequest, JogRequest, MovePieceRequest,
    MoveToSquareRequest, OkResponse, PerformMovesRequest, RawWriteRequest, RawWriteResponse,
    StatusResponse,
};
use crate::sequencer::{MoveSequencer, SettleDelays};

/// Shared handler state, passed by `Extension`.
pub struct AppState {
    pub axis: Arc<AxisController>,
    pub gripper: Arc<GripperController>,
    pub sequencer: Arc<MoveSequencer>,
    pub config: Mutex<ConfigManager>,
}

/// Error surface of the HTTP layer.
///
/// Rig errors map onto HTTP statuses by who is at fault: the request (400),
/// the machine's current state (409), the actuator (502), or the absence of
/// a gripper port (503).
pub enum ApiError {
    Rig(RigError),
    Internal(String),
}

impl From<RigError> for ApiError {
    fn from(err: RigError) -> Self {
        ApiError::Rig(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Rig(err) => {
                let status = match &err {
                    RigError::InvalidSquare(_) | RigError::InvalidConfiguration(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    RigError::NotInitialized(_) | RigError::NotHomed(_) => StatusCode::CONFLICT,
                    RigError::ActuatorProtocol(_) | RigError::ActuatorUnreachable(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    RigError::NoPortFound => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.to_string())
            }
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        tracing::warn!("Request failed ({}): {}", status, message);
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chess/v1/status", get(status))
        .route("/chess/v1/actuator_status", get(actuator_status))
        .route("/chess/v1/serial_status", get(serial_status))
        .route("/chess/v1/initialize_actuator", post(initialize_actuator))
        .route("/chess/v1/initialize_controller", post(initialize_controller))
        .route("/chess/v1/home", post(home))
        .route("/chess/v1/jog", post(jog))
        .route("/chess/v1/move_to_square", post(move_to_square))
        .route("/chess/v1/move_piece", post(move_piece))
        .route("/chess/v1/perform_moves", post(perform_moves))
        .route("/chess/v1/raw_write", post(raw_write))
        .route("/chess/v1/config", get(get_config).put(update_config))
        .layer(cors)
        .layer(Extension(state))
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    tracing::info!("HTTP control surface listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .await?;
    Ok(())
}

async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        axis: state.axis.status().await,
        serial: state.gripper.status().await,
    })
}

async fn actuator_status(Extension(state): Extension<Arc<AppState>>) -> Json<ActuatorHealth> {
    Json(state.axis.health().await)
}

async fn serial_status(Extension(state): Extension<Arc<AppState>>) -> Json<SerialReport> {
    Json(state.gripper.status().await)
}

async fn initialize_actuator(Extension(state): Extension<Arc<AppState>>) -> ApiResult<OkResponse> {
    state.axis.initialize().await?;
    Ok(Json(OkResponse::ok()))
}

/// (Re)acquire the gripper serial link. Always answers with the full
/// per-check report; failure detail lives in the report, not the status.
async fn initialize_controller(Extension(state): Extension<Arc<AppState>>) -> Json<SerialReport> {
    Json(state.gripper.initialize().await)
}

async fn home(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<HomeRequest>,
) -> ApiResult<OkResponse> {
    state
        .axis
        .home(request.x, request.y, request.z, request.apply_hand_offset)
        .await?;
    Ok(Json(OkResponse::ok()))
}

async fn jog(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<JogRequest>,
) -> ApiResult<OkResponse> {
    if request.absolute {
        state
            .axis
            .move_absolute(request.x, request.y, request.z)
            .await?;
    } else {
        state
            .axis
            .move_relative(request.x, request.y, request.z)
            .await?;
    }
    Ok(Json(OkResponse::ok()))
}

async fn move_to_square(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<MoveToSquareRequest>,
) -> ApiResult<OkResponse> {
    let square: Square = request.square.parse().map_err(ApiError::from)?;
    state.axis.move_to_square(square).await?;
    Ok(Json(OkResponse::ok()))
}

async fn move_piece(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<MovePieceRequest>,
) -> ApiResult<OkResponse> {
    let from: Square = request.from.parse().map_err(ApiError::from)?;
    let to: Square = request.to.parse().map_err(ApiError::from)?;
    state.sequencer.move_piece(from, to).await?;
    Ok(Json(OkResponse::ok()))
}

async fn perform_moves(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<PerformMovesRequest>,
) -> ApiResult<OkResponse> {
    state
        .sequencer
        .perform_moves(&request.moves, request.skip_gripper)
        .await?;
    Ok(Json(OkResponse::ok()))
}

async fn raw_write(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<RawWriteRequest>,
) -> ApiResult<RawWriteResponse> {
    let lines = state.gripper.write_read(&request.command).await?;
    Ok(Json(RawWriteResponse { lines }))
}

/// The board section comes from the live axis controller rather than the
/// persisted file, so the response always matches what motion will use.
async fn get_config(Extension(state): Extension<Arc<AppState>>) -> Json<ConfigResponse> {
    let board = state.axis.board_config().await;
    let settle = state.config.lock().await.get_settle_config();
    Json(ConfigResponse { board, settle })
}

/// Apply a partial update, validate it, persist it, and push it into the
/// live controllers. Validation happens before anything is written.
async fn update_config(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ConfigUpdateRequest>,
) -> ApiResult<ConfigResponse> {
    let mut config = state.config.lock().await;

    let mut board = config.get_board_config();
    let mut settle = config.get_settle_config();
    request.apply_to(&mut board, &mut settle);
    BoardGeometry::new(board.clone()).validate_positive()?;

    config.set_board_config(board.clone()).await?;
    config.set_settle_config(settle.clone()).await?;

    state.axis.update_board_config(board.clone()).await;
    state
        .sequencer
        .set_delays(SettleDelays::from_config(&settle))
        .await;

    Ok(Json(ConfigResponse { board, settle }))
}
