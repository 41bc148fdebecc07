use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::types::now_millis;

/// Success envelope: `{ "data": ..., "timestamp": ... }`. Errors use the
/// matching `{ "message": ..., "timestamp": ... }` shape via `ApiError`.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status_code: Option<StatusCode>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { data, status_code: None }
    }

    pub fn with_status(data: T, status_code: StatusCode) -> Self {
        Self { data, status_code: Some(status_code) }
    }

    pub fn created(data: T) -> Self {
        Self::with_status(data, StatusCode::CREATED)
    }
}

/// `{ "data": "Updated Successfully", ... }`
pub fn updated() -> ApiResponse<&'static str> {
    ApiResponse::success("Updated Successfully")
}

/// `{ "data": "Created Successfully", ... }`
pub fn created() -> ApiResponse<&'static str> {
    ApiResponse::created("Created Successfully")
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status_code.unwrap_or(StatusCode::OK);
        let data_value = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("failed to serialize response data: {}", e);
                let body = json!({
                    "message": "Failed to serialize response data",
                    "timestamp": now_millis(),
                });
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
            }
        };

        let envelope = json!({
            "data": data_value,
            "timestamp": now_millis(),
        });
        (status, Json(envelope)).into_response()
    }
}
