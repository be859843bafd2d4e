use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary; the credential itself is never echoed.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "storecoach-rs is running",
        "config": {
            "model": state.initiator.model(),
            "provider_configured": state.initiator.is_configured(),
            "base_path": config.server.base_path,
            "features": {
                "log_level": config.features.log_level,
                "log_format": config.features.log_format,
                "default_system_prompt": config.features.default_system_prompt.is_some(),
            }
        }
    }))
}
