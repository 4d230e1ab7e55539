//! The API-boundary error type. Every component error converges here, matching SPEC_FULL.md
//! §7's error-kind catalog. Grounded on the teacher's `ErrorResponse`/`IntoResponse` pattern in
//! `ui.rs` — a `thiserror` enum serialized as `{ "error": "<code>", "message": "<text>" }`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("{0}")]
	ParseError(String),
	#[error("route claims a reserved path: {0}")]
	ReservedPath(String),
	#[error("{0}")]
	Forbidden(String),
	#[error("no such conflict for {0}")]
	NoSuchConflict(String),
	#[error("candidate file {0} is not among the current candidates")]
	CandidateMissing(String),
	#[error("{0}")]
	Collision(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("dataplane validation failed: {0}")]
	ValidationFailed(String),
	#[error("authentication required")]
	AuthFailed,
	#[error(transparent)]
	Pipeline(#[from] crate::pipeline::PipelineError),
	#[error(transparent)]
	Heal(#[from] crate::heal::HealError),
}

#[derive(Serialize)]
struct ErrorBody {
	error: &'static str,
	message: String,
}

impl ApiError {
	fn code(&self) -> &'static str {
		match self {
			ApiError::ParseError(_) => "parse-error",
			ApiError::ReservedPath(_) => "reserved-path",
			ApiError::Forbidden(_) => "forbidden",
			ApiError::NoSuchConflict(_) => "no-such-conflict",
			ApiError::CandidateMissing(_) => "candidate-missing",
			ApiError::Collision(_) => "collision",
			ApiError::NotFound(_) => "not-found",
			ApiError::ValidationFailed(_) => "validation-failed",
			ApiError::AuthFailed => "auth-failed",
			ApiError::Pipeline(_) => "validation-failed",
			ApiError::Heal(_) => "heal-exhausted",
		}
	}

	fn status(&self) -> StatusCode {
		match self {
			ApiError::ParseError(_) | ApiError::Collision(_) | ApiError::ValidationFailed(_) | ApiError::Pipeline(_) => StatusCode::UNPROCESSABLE_ENTITY,
			ApiError::ReservedPath(_) | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
			ApiError::NoSuchConflict(_) | ApiError::CandidateMissing(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
			ApiError::AuthFailed => StatusCode::UNAUTHORIZED,
			ApiError::Heal(_) => StatusCode::CONFLICT,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		let body = ErrorBody { error: self.code(), message: self.to_string() };
		(status, Json(body)).into_response()
	}
}
