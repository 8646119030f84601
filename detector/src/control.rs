//! Local HTTP control surface.
//!
//! Small JSON API for operating the detector from scripts or a tray UI:
//! arm and disarm the proximity trigger, rerun calibration, and inspect
//! the currently detected position.

use crate::capture::{CalibrationOutcome, Calibrator, PositionDetector};
use crate::config::ConfigStore;
use crate::network::ClientCommand;
use crate::proximity::{ProximityEvaluator, StartError, StopOutcome};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct ControlState {
    pub evaluator: Arc<ProximityEvaluator>,
    pub config: ConfigStore,
    pub detector: Arc<dyn PositionDetector>,
    pub calibrator: Arc<dyn Calibrator>,
    pub relay_cmds: mpsc::UnboundedSender<ClientCommand>,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub keys: Vec<String>,
}

pub fn build_router(state: ControlState) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/recalibrate", post(recalibrate))
        .route("/position", get(position))
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: ControlState,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Control API listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn start(
    State(state): State<ControlState>,
    Json(req): Json<StartRequest>,
) -> (StatusCode, Json<Value>) {
    match state.evaluator.start(req.keys.clone()).await {
        Ok(()) => {
            info!("Automation started with keys {:?}", req.keys);
            (
                StatusCode::OK,
                Json(json!({ "status": "running", "keys": req.keys })),
            )
        }
        Err(StartError::InvalidKeys) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "keys must be a non-empty list of non-blank strings" })),
        ),
        Err(StartError::AlreadyRunning) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "already running" })),
        ),
    }
}

async fn stop(State(state): State<ControlState>) -> (StatusCode, Json<Value>) {
    match state.evaluator.stop().await {
        StopOutcome::Stopped => {
            info!("Automation stopped");
            (StatusCode::OK, Json(json!({ "status": "stopped" })))
        }
        StopOutcome::AlreadyIdle => (StatusCode::OK, Json(json!({ "status": "already_idle" }))),
    }
}

async fn recalibrate(State(state): State<ControlState>) -> (StatusCode, Json<Value>) {
    let calibrator = state.calibrator.clone();
    // The calibration flow blocks on user interaction
    let outcome = match tokio::task::spawn_blocking(move || calibrator.calibrate()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Calibration task panicked: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "calibration task failed" })),
            );
        }
    };

    match outcome {
        CalibrationOutcome::Configured(config) => {
            if let Err(e) = state.config.set(config).await {
                error!("Could not persist calibrated region: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "status": "error", "message": format!("could not save config: {}", e) })),
                );
            }
            if state
                .relay_cmds
                .send(ClientCommand::BroadcastConfig(config))
                .is_err()
            {
                warn!("Relay client gone, calibrated region not shared");
            }

            // Immediate sample so the caller sees the new region working
            let body = match state.detector.detect(&config) {
                Some(pos) => json!({
                    "status": "success",
                    "coords": config,
                    "pos_status": "found",
                    "pos": pos,
                }),
                None => json!({
                    "status": "success",
                    "coords": config,
                    "pos_status": "not_found",
                }),
            };
            (StatusCode::OK, Json(body))
        }
        CalibrationOutcome::Cancelled => {
            (StatusCode::OK, Json(json!({ "status": "cancelled" })))
        }
        CalibrationOutcome::Failed(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": message })),
        ),
    }
}

async fn position(State(state): State<ControlState>) -> (StatusCode, Json<Value>) {
    let config = match state.config.get().await {
        Some(config) => config,
        None => {
            return (
                StatusCode::OK,
                Json(json!({ "status": "no_config", "message": "minimap region not calibrated" })),
            )
        }
    };

    match state.detector.detect(&config) {
        Some(pos) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "pos": pos })),
        ),
        None => (StatusCode::OK, Json(json!({ "status": "not_found" }))),
    }
}
