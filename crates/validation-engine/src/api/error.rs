//! HTTP 层错误
//!
//! 把引擎错误映射为 HTTP 状态码和统一的 JSON 响应体。

use crate::error::RuleError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

const GENERIC_MESSAGE: &str = "服务内部错误，请稍后重试";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Rule(err) => match err {
                RuleError::Syntax(_)
                | RuleError::Configuration(_)
                | RuleError::InvalidReference(_)
                | RuleError::InvalidName(_)
                | RuleError::Compilation(_)
                | RuleError::TypeMismatch { .. }
                | RuleError::ExecutionError(_) => StatusCode::BAD_REQUEST,
                RuleError::RuleNotFound(_) | RuleError::TypeNotFound(_) => StatusCode::NOT_FOUND,
                RuleError::CompileTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
                RuleError::Database(_) | RuleError::JsonError(_) | RuleError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Rule(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详情只写日志
        let message = match &self {
            Self::Rule(RuleError::Database(e)) => {
                tracing::error!(error = %e, "数据库操作失败");
                GENERIC_MESSAGE.to_string()
            }
            Self::Rule(RuleError::JsonError(e)) => {
                tracing::error!(error = %e, "JSON 处理失败");
                GENERIC_MESSAGE.to_string()
            }
            Self::Rule(RuleError::Internal(e)) => {
                tracing::error!(error = %e, "内部错误");
                GENERIC_MESSAGE.to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostic;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::from(RuleError::Syntax("x".into())), StatusCode::BAD_REQUEST),
            (
                ApiError::from(RuleError::Configuration("不支持的模式".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(RuleError::Compilation(vec![Diagnostic::new(3, "x")])),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::from(RuleError::RuleNotFound("1".into())), StatusCode::NOT_FOUND),
            (ApiError::from(RuleError::TypeNotFound("a01".into())), StatusCode::NOT_FOUND),
            (
                ApiError::from(RuleError::CompileTimeout(Duration::from_secs(30))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::from(RuleError::Internal("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn test_error_code_passes_through_rule_error() {
        let err = ApiError::from(RuleError::InvalidReference("LBL".into()));
        assert_eq!(err.error_code(), "INVALID_REFERENCE");
        assert_eq!(ApiError::Validation("x".into()).error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_from_validation_errors_keeps_field_name() {
        use validator::{ValidationError, ValidationErrors};

        let mut errors = ValidationErrors::new();
        let mut field_error = ValidationError::new("length");
        field_error.message = Some("规则名称长度必须在1-80个字符之间".into());
        errors.add("name", field_error);

        let err: ApiError = errors.into();
        match &err {
            ApiError::Validation(msg) => assert!(msg.contains("name"), "{msg}"),
            other => panic!("期望 Validation, 实际 {other:?}"),
        }
    }

    #[test]
    fn test_internal_error_hides_details() {
        let response = ApiError::from(RuleError::Internal("secret detail".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
