use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub const FULFILLMENT_FAILED_MESSAGE: &str = "Failed to fulfill order at factory";

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "reportUrl", skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

/// Error taxonomy for every user-facing failure. Each variant renders as
/// `{code, message}` JSON plus an `X-Error-Code` header so middleware can
/// count failures without parsing bodies.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden { message: String },
    NotFound { message: String },
    Conflict { message: String },
    BadRequest { message: String },
    Fulfillment { report_url: Option<String> },
    Internal { message: String },
}

impl ApiError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal {
            message: e.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Fulfillment { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (body, error_code) = match self {
            ApiError::Unauthorized => (
                ErrorBody {
                    code: "unauthorized".into(),
                    message: "unauthorized".into(),
                    report_url: None,
                },
                "unauthorized",
            ),
            ApiError::Forbidden { message } => (
                ErrorBody {
                    code: "forbidden".into(),
                    message,
                    report_url: None,
                },
                "forbidden",
            ),
            ApiError::NotFound { message } => (
                ErrorBody {
                    code: "not_found".into(),
                    message,
                    report_url: None,
                },
                "not_found",
            ),
            ApiError::Conflict { message } => (
                ErrorBody {
                    code: "conflict".into(),
                    message,
                    report_url: None,
                },
                "conflict",
            ),
            ApiError::BadRequest { message } => (
                ErrorBody {
                    code: "bad_request".into(),
                    message,
                    report_url: None,
                },
                "bad_request",
            ),
            ApiError::Fulfillment { report_url } => (
                ErrorBody {
                    code: "fulfillment_failed".into(),
                    message: FULFILLMENT_FAILED_MESSAGE.into(),
                    report_url,
                },
                "fulfillment_failed",
            ),
            ApiError::Internal { message } => (
                ErrorBody {
                    code: "internal_error".into(),
                    message,
                    report_url: None,
                },
                "internal_error",
            ),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
