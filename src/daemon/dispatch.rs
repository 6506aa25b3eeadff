//! Method dispatch — unpacks request parameters and routes them to the
//! facade. Total: every failure becomes a structured error response;
//! nothing escapes to the transport loop.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ServiceError;
use crate::service::{QaService, ServiceStatus};
use crate::settings::{EngineSettings, SettingsPatch};

use super::protocol::{Request, Response};

/// Dispatch one request against the service.
pub fn dispatch(service: &mut QaService, request: Request) -> Response {
    debug!(method = %request.method, "dispatching request");
    match request.method.as_str() {
        "initialize" => initialize(service, request.params),
        "ask" => ask(service, request.params),
        "update_settings" => update_settings(service, request.params),
        "get_preset_names" => get_preset_names(service),
        "get_status" => get_status(service),
        other => Response::error(format!("Unknown method: {}", other)),
    }
}

fn initialize(service: &mut QaService, params: Map<String, Value>) -> Response {
    let settings: EngineSettings = match serde_json::from_value(Value::Object(params)) {
        Ok(settings) => settings,
        Err(e) => return Response::error(format!("Server error: {}", e)),
    };
    match service.initialize(settings) {
        Ok(message) => Response::success(json!({ "message": message })),
        Err(e) => Response::error(e.to_string()),
    }
}

fn ask(service: &mut QaService, params: Map<String, Value>) -> Response {
    // A missing question is left to the engine's own validation.
    let question = params
        .get("question")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    match service.ask(question) {
        Ok(outcome) => Response::success(outcome),
        Err(e) => Response::error(e.to_string()),
    }
}

fn update_settings(service: &mut QaService, params: Map<String, Value>) -> Response {
    let patch: SettingsPatch = match serde_json::from_value(Value::Object(params)) {
        Ok(patch) => patch,
        Err(e) => return Response::error(format!("Server error: {}", e)),
    };
    match service.update_settings(patch) {
        Ok(message) => Response::success(json!({ "message": message })),
        Err(e) => Response::error(e.to_string()),
    }
}

fn get_preset_names(service: &QaService) -> Response {
    Response::success(json!({ "presets": service.preset_names() }))
}

fn get_status(service: &QaService) -> Response {
    match service.status() {
        ServiceStatus::NotInitialized => {
            Response::not_initialized(ServiceError::NotInitialized.to_string())
        }
        ServiceStatus::Initialized {
            data_dir,
            llm,
            embedding,
            preset,
        } => Response::initialized(json!({
            "data_dir": data_dir,
            "llm": llm,
            "embedding": embedding,
            "preset": preset,
        })),
    }
}
