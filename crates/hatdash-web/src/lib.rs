//! Hatdash Web - live view of the sensor pipeline
//!
//! Features:
//! - Websocket push of every published sample to each connected viewer
//! - Recording and display status broadcast on change
//! - Viewer commands (recording on/off, display mode) over the socket or HTTP
//! - JSON status endpoints and static dashboard files

use std::path::Path;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use hatdash_core::{DisplayInput, DisplayMode, DisplayStatus, SampleRecord};
use hatdash_pipeline::{Command, PipelineHandle, RecordingStatus, SensorKind};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

/// Shared by every request and viewer session.
#[derive(Clone)]
pub struct AppState {
    pipeline: PipelineHandle,
    period: Duration,
}

impl AppState {
    pub fn new(pipeline: PipelineHandle, period: Duration) -> Self {
        Self { pipeline, period }
    }
}

/// Creates the Axum router with all routes
pub fn create_router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(handle_ws))
        .route("/api/latest", get(handle_latest))
        .route("/api/status", get(handle_status))
        .route("/api/display", get(handle_display))
        .route("/api/command", post(handle_command))
        .with_state(state)
        .fallback_service(ServeDir::new(static_dir))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Display inputs a viewer may send in place of the joystick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoystickEvent {
    ModeNext,
    TogglePower,
    LowLightOn,
    LowLightOff,
}

impl From<JoystickEvent> for DisplayInput {
    fn from(event: JoystickEvent) -> Self {
        match event {
            JoystickEvent::ModeNext => DisplayInput::ModeNext,
            JoystickEvent::TogglePower => DisplayInput::TogglePower,
            JoystickEvent::LowLightOn => DisplayInput::SetLowLight(true),
            JoystickEvent::LowLightOff => DisplayInput::SetLowLight(false),
        }
    }
}

/// A command from a viewer: `"start_recording"`, `{"stop_recording": null}`,
/// `{"joystick_event": "mode_next"}` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerCommand {
    StartRecording,
    StopRecording,
    ToggleRecording,
    JoystickEvent(JoystickEvent),
}

pub fn parse_command(text: &str) -> serde_json::Result<ViewerCommand> {
    serde_json::from_str(text)
}

/// Forwards a viewer command into the pipeline. False once the pipeline has stopped.
pub fn apply_command(pipeline: &PipelineHandle, cmd: ViewerCommand) -> bool {
    debug!(?cmd, "viewer command");
    match cmd {
        ViewerCommand::StartRecording => pipeline.controls.command(Command::StartRecording),
        ViewerCommand::StopRecording => pipeline.controls.command(Command::StopRecording),
        ViewerCommand::ToggleRecording => pipeline.controls.command(Command::ToggleRecording),
        ViewerCommand::JoystickEvent(event) => pipeline.controls.display(event.into()),
    }
}

/// Everything pushed to a viewer, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Sample(SampleRecord),
    RecordingStatus(RecordingStatus),
    DisplayStatus(DisplayStatus),
    Error { message: String },
}

impl ServerMessage {
    fn to_ws(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                warn!("could not encode viewer message: {e}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Websocket
// ---------------------------------------------------------------------------

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| viewer_session(socket, state))
}

/// Only these fields trigger a display push; the frame itself changes every tick.
fn display_key(status: &DisplayStatus) -> (DisplayMode, bool, bool) {
    (status.mode, status.is_on, status.low_light)
}

async fn send(socket: &mut WebSocket, msg: ServerMessage) -> bool {
    match msg.to_ws() {
        Some(frame) => socket.send(frame).await.is_ok(),
        None => true,
    }
}

async fn viewer_session(mut socket: WebSocket, state: AppState) {
    let pipeline = &state.pipeline;
    let mut samples = pipeline.bus.subscribe();
    let mut recording = pipeline.recording.clone();
    let mut display = pipeline.display.clone();
    info!(viewer = samples.id(), "viewer connected");

    let initial_recording = recording.borrow_and_update().clone();
    let initial_display = display.borrow_and_update().clone();
    let mut shown = display_key(&initial_display);
    if !send(&mut socket, ServerMessage::RecordingStatus(initial_recording)).await
        || !send(&mut socket, ServerMessage::DisplayStatus(initial_display)).await
    {
        return;
    }

    loop {
        let keep_going = tokio::select! {
            sample = samples.recv() => match sample {
                Some(sample) => send(&mut socket, ServerMessage::Sample(sample.record())).await,
                None => false,
            },
            Ok(()) = recording.changed() => {
                let status = recording.borrow_and_update().clone();
                send(&mut socket, ServerMessage::RecordingStatus(status)).await
            }
            Ok(()) = display.changed() => {
                let status = display.borrow_and_update().clone();
                if display_key(&status) != shown {
                    shown = display_key(&status);
                    send(&mut socket, ServerMessage::DisplayStatus(status)).await
                } else {
                    true
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => match parse_command(text.as_str()) {
                    Ok(cmd) => apply_command(pipeline, cmd),
                    Err(e) => {
                        let message = format!("unrecognised command: {e}");
                        send(&mut socket, ServerMessage::Error { message }).await
                    }
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                Some(Ok(_)) => true,
            },
        };
        if !keep_going {
            break;
        }
    }

    info!(viewer = samples.id(), skipped = samples.skipped(), "viewer disconnected");
    pipeline.bus.unsubscribe(samples);
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Latest published sample; 204 until the first one exists.
async fn handle_latest(State(state): State<AppState>) -> Result<Json<SampleRecord>, StatusCode> {
    let latest = state.pipeline.latest.borrow();
    match latest.as_deref() {
        Some(sample) => Ok(Json(sample.record())),
        None => Err(StatusCode::NO_CONTENT),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sensor: SensorKind,
    pub period_ms: u64,
    pub viewers: usize,
    pub recording: RecordingStatus,
    pub display: DisplayStatus,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let pipeline = &state.pipeline;
    Json(StatusResponse {
        sensor: pipeline.sensor,
        period_ms: state.period.as_millis() as u64,
        viewers: pipeline.bus.subscriber_count(),
        recording: pipeline.recording.borrow().clone(),
        display: pipeline.display.borrow().clone(),
    })
}

async fn handle_display(State(state): State<AppState>) -> Json<DisplayStatus> {
    Json(state.pipeline.display.borrow().clone())
}

async fn handle_command(
    State(state): State<AppState>,
    Json(cmd): Json<ViewerCommand>,
) -> StatusCode {
    if apply_command(&state.pipeline, cmd) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
