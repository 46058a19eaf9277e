use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use tilegraph_core::error::CoreError;
use tilegraph_pipeline::{PipelineError, PipelineErrors};

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`PipelineErrors`] and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `tilegraph_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Map configuration resolution failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineErrors),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Dependency(msg) => {
                    tracing::warn!(error = %msg, "Dependency error");
                    (StatusCode::BAD_GATEWAY, "DEPENDENCY_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Pipeline(errors) => {
                let body = pipeline_error_body(errors);
                let status = if errors.all_validation() {
                    StatusCode::BAD_REQUEST
                } else {
                    tracing::warn!(error = %errors, "Map configuration resolution failed");
                    StatusCode::BAD_GATEWAY
                };
                return (status, axum::Json(body)).into_response();
            }

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// `{ error, code, errors, errors_with_context }` for a failed resolution.
fn pipeline_error_body(errors: &PipelineErrors) -> Value {
    let code = if errors.all_validation() {
        "VALIDATION_ERROR"
    } else {
        "DEPENDENCY_ERROR"
    };
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    let with_context: Vec<Value> = errors.iter().map(error_context).collect();

    json!({
        "error": errors.to_string(),
        "code": code,
        "errors": messages,
        "errors_with_context": with_context,
    })
}

fn error_context(error: &PipelineError) -> Value {
    let message = error.to_string();
    match error {
        PipelineError::MissingLayerNode { layer_index, source_id } => json!({
            "type": "layer",
            "message": message,
            "layer": { "index": layer_index, "source_id": source_id },
        }),
        PipelineError::InvalidDataview { dataview, .. }
        | PipelineError::MissingDataviewNode { dataview, .. } => json!({
            "type": "dataview",
            "message": message,
            "dataview": { "id": dataview },
        }),
        PipelineError::InvalidFilter { target, .. } => json!({
            "type": "filter",
            "message": message,
            "filter": { "target": target },
        }),
        PipelineError::Analysis { analysis_id, node, .. } => json!({
            "type": "analysis",
            "message": message,
            "analysis": {
                "id": analysis_id,
                "node_id": node.id,
                "type": node.node_type,
            },
        }),
        PipelineError::Dependency(_) => json!({
            "type": "unknown",
            "message": message,
        }),
    }
}
