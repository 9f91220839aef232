//! Error handler for adguidsync.

use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use ldap3::LdapError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the synchronization engine can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration is invalid: {0}")]
    Config(String),

    #[error("configuration is invalid")]
    Validation(#[from] ValidationErrors),

    #[error("IT-system `{0}` does not exist in OS2mo")]
    ItSystemNotFound(String),

    #[error("employee {0} not found")]
    EmployeeNotFound(Uuid),

    #[error("employee {0} has no match in the directory")]
    NoDirectoryMatch(Uuid),

    #[error("invalid objectGUID `{0}`")]
    InvalidGuid(String),

    #[error("LDAP request failed: {0}")]
    Ldap(#[from] LdapError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GraphQL request returned errors: {0}")]
    GraphQl(String),

    #[error("batch returned {got} values for {expected} keys")]
    BatchLength { expected: usize, got: usize },

    #[error("batch load failed: {0}")]
    Batch(Arc<Error>),

    #[error("batch was dropped before completion")]
    Canceled,
}

impl Error {
    /// Whether the error aborts a whole run rather than a single employee.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config(_)
            | Error::Validation(_)
            | Error::ItSystemNotFound(_) => true,
            Error::Batch(inner) => inner.is_fatal(),
            _ => false,
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/problem+json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let response = ResponseError::default().details(&self.to_string());

        let response = match &self {
            Error::EmployeeNotFound(_) => response
                .title("Employee does not exist.")
                .status(StatusCode::NOT_FOUND),

            err if err.is_fatal() => {
                tracing::error!(error = %err, "synchronization is misconfigured");
                response.title("Synchronization is misconfigured.")
            },

            Error::Ldap(_) | Error::Http(_) | Error::GraphQl(_) => {
                tracing::error!(error = %self, "upstream request failed");
                response
                    .title("Upstream service failed.")
                    .status(StatusCode::BAD_GATEWAY)
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/problem+json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
