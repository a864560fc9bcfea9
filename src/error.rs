use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use thiserror::Error;

use crate::engine::EngineError;
use crate::types::FailureResponse;

/// 所有路由统一的失败出口：校验错误 400，远端错误 500
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("upstream failure: {0}")]
    Upstream(#[from] EngineError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::Validation(_) => Status::BadRequest,
            ApiError::Upstream(_) => Status::InternalServerError,
        }
    }

    fn body(&self) -> FailureResponse {
        match self {
            ApiError::Validation(message) => FailureResponse::new(message.clone()),
            ApiError::Upstream(e) => FailureResponse {
                success: false,
                message: "Failed to generate text".to_string(),
                error: Some(e.to_string()),
            },
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        match &self {
            ApiError::Validation(message) => {
                log::info!("{} {}: rejected: {message}", req.method(), req.uri())
            }
            ApiError::Upstream(e) => log::error!("{} {}: {e}", req.method(), req.uri()),
        }

        let status = self.status();
        Response::build_from(Json(self.body()).respond_to(req)?)
            .status(status)
            .ok()
    }
}
