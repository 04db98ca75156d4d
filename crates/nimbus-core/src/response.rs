//! Response builder and JSON helpers

use crate::types::{ErrorDetail, ErrorPayload};
use crate::Result;
use bytes::Bytes;
use http::{header, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use crate::middleware::Body;

/// Response builder for convenient response construction
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(header::HeaderName, String)>,
}

impl ResponseBuilder {
    /// Create a new response builder
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Set a header
    pub fn header(mut self, name: header::HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Build response with empty body
    pub fn build(self) -> Result<Response<Body>> {
        self.finish(None, Bytes::new())
    }

    /// Build response with text body
    pub fn text(self, body: impl Into<String>) -> Result<Response<Body>> {
        self.finish(
            Some("text/plain; charset=utf-8"),
            Bytes::from(body.into()),
        )
    }

    /// Build response with JSON body
    pub fn json_body<T: Serialize>(self, body: &T) -> Result<Response<Body>> {
        let json = serde_json::to_vec(body)?;
        self.finish(Some("application/json"), Bytes::from(json))
    }

    fn finish(self, content_type: Option<&str>, body: Bytes) -> Result<Response<Body>> {
        let mut response = Response::builder().status(self.status);

        if let Some(content_type) = content_type {
            response = response.header(header::CONTENT_TYPE, content_type);
        }

        for (name, value) in self.headers {
            response = response.header(name, value);
        }

        Ok(response.body(Full::new(body))?)
    }
}

/// Convenience functions for common responses
pub mod responses {
    use super::*;

    /// 200 with `{ "data": body }`
    pub fn data<T: Serialize>(body: &T) -> Result<Response<Body>> {
        ResponseBuilder::new(StatusCode::OK).json_body(&serde_json::json!({ "data": body }))
    }

    /// 204 No Content
    pub fn no_content() -> Result<Response<Body>> {
        ResponseBuilder::new(StatusCode::NO_CONTENT).build()
    }

    /// Uniform error payload, status taken from the detail
    pub fn error(detail: ErrorDetail) -> Result<Response<Body>> {
        let status = StatusCode::from_u16(detail.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ResponseBuilder::new(status).json_body(&ErrorPayload::from(detail))
    }

    /// Uniform error payload built from a [`crate::Error`]
    pub fn from_error(err: &crate::Error, maintaining: bool) -> Result<Response<Body>> {
        error(ErrorDetail {
            code: err.code().to_string(),
            message: err.to_string(),
            status: err.to_status_code().as_u16(),
            maintaining,
        })
    }
}
