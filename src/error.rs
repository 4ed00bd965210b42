use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{error_codes, error_to_api_response};

/// 位置子系统的错误分类
///
/// "记录不存在" 不是错误，用 `Option::None` 表示。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    /// 输入格式错误，在访问存储之前拒绝
    #[error("invalid location input: {0}")]
    Validation(String),

    /// 存储或订阅通道暂时不可用
    #[error("location backend unavailable: {0}")]
    Transient(String),
}

impl From<sqlx::Error> for LocationError {
    fn from(e: sqlx::Error) -> Self {
        LocationError::Transient(e.to_string())
    }
}

impl From<redis::RedisError> for LocationError {
    fn from(e: redis::RedisError) -> Self {
        LocationError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for LocationError {
    fn from(e: serde_json::Error) -> Self {
        LocationError::Transient(e.to_string())
    }
}

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    PermissionDenied,
    NotFound(String),
    Validation(String),
    Internal(String),
}

impl From<LocationError> for AppError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::Validation(msg) => AppError::Validation(msg),
            LocationError::Transient(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "unauthorized".to_string(),
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                error_codes::PERMISSION_DENIED,
                "only the ride host may report its location".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, msg)
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                msg,
            ),
        };

        (status, error_to_api_response::<()>(code, msg)).into_response()
    }
}
