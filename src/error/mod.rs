//! Error types for configuration, context lookup, dispatch and rendering.

use std::path::PathBuf;

use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::StatusCode;
use thiserror::Error;

use crate::http::Response;

/// Errors raised while configuring an application or wiring controllers.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Problem loading config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Controller class '{0}' does not match the <Name>Controller pattern")]
    ControllerName(String),

    #[error("Unsupported database engine '{0}'")]
    UnsupportedEngine(String),

    #[error("Controller '{0}' is not registered in the active context")]
    Unregistered(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Route '{pattern}' captures '{field}', which controller '{controller}' does not declare")]
    UndeclaredCapture {
        controller: String,
        field: String,
        pattern: String,
    },

    #[error("Could not resolve project root: {0}")]
    PathResolution(String),

    #[error("Invalid logging configuration: {0}")]
    Logging(String),
}

/// Errors raised by the application context stack.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Bald is not configured (accessed '{0}')")]
    NotConfigured(String),

    #[error("Cannot pop the placeholder context")]
    EmptyStack,
}

impl ContextError {
    pub fn not_configured(field: impl Into<String>) -> Self {
        Self::NotConfigured(field.into())
    }
}

/// Template lookup and rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template '{0}' not found")]
    NotFound(String),

    #[error("Failed to read template '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{message} in {path}")]
    Parse { message: String, path: PathBuf },

    #[error("{0}")]
    Render(String),
}

/// Errors raised while binding request data onto a controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Controller '{controller}' does not declare a field named '{field}'")]
    UndeclaredField { controller: String, field: String },

    #[error("'{field}' is reserved on controller '{controller}'")]
    ReservedField { controller: String, field: String },

    #[error("Invalid HTTP status code {0}")]
    InvalidStatus(u16),
}

/// Storage engine errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Bald is not configured (database engine unavailable)")]
    NotConfigured,

    #[error("Could not serialize row for '{table}': {source}")]
    Serialize {
        table: String,
        source: serde_json::Error,
    },

    #[error("Could not load row from '{table}': {source}")]
    Deserialize {
        table: String,
        source: serde_json::Error,
    },
}

/// An explicit HTTP status escalation.
///
/// Raised by `not_found`, `status` and `redirect_to` on a controller and
/// carried up to the outermost layer, which turns it into a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{status}")]
pub struct HttpSignal {
    pub status: StatusCode,
    pub message: Option<String>,
    pub location: Option<String>,
}

impl HttpSignal {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            location: None,
        }
    }

    pub fn not_found(message: Option<String>) -> Self {
        Self {
            message,
            ..Self::new(StatusCode::NOT_FOUND)
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::new(StatusCode::FOUND)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Build the response the signal stands for.
    pub fn into_response(self) -> Response {
        let body = match self.message {
            _ if !status_has_body(self.status) => String::new(),
            Some(message) => message,
            None => self
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
        };
        let mut response = Response::new(Bytes::from(body)).with_status(self.status);
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=UTF-8"),
        );
        if let Some(location) = self.location {
            if let Ok(value) = HeaderValue::from_str(&location) {
                response.headers.insert(LOCATION, value);
            }
        }
        response
    }
}

/// 1xx, 204 and 304 responses never carry a body.
fn status_has_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// A unified error type for every layer of the framework.
#[derive(Debug, Error)]
pub enum BaldError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("HTTP {0}")]
    Status(#[from] HttpSignal),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BaldError {
    /// The HTTP status this error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Status(signal) => signal.status,
            Self::Template(TemplateError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Self::Status(signal) => signal.into_response(),
            Self::Template(TemplateError::NotFound(key)) => {
                HttpSignal::not_found(Some(format!("Template '{}' not found", key))).into_response()
            }
            other => HttpSignal::new(StatusCode::INTERNAL_SERVER_ERROR)
                .with_message(other.to_string())
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_miss_is_not_found() {
        let err = BaldError::from(TemplateError::NotFound("/widget.html.template".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_signal_keeps_status() {
        let err = BaldError::from(HttpSignal::new(StatusCode::FORBIDDEN));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let response = err.into_response();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(response.body.as_ref(), b"Forbidden");
    }

    #[test]
    fn test_bodiless_statuses_stay_empty() {
        for status in [StatusCode::CONTINUE, StatusCode::NO_CONTENT, StatusCode::NOT_MODIFIED] {
            let response = HttpSignal::new(status).into_response();
            assert_eq!(response.status, status);
            assert!(response.body.is_empty());
        }
        let response = HttpSignal::new(StatusCode::NO_CONTENT)
            .with_message("ignored")
            .into_response();
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_redirect_sets_location() {
        let response = HttpSignal::redirect("/login").into_response();
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.headers.get(LOCATION).unwrap(), "/login");
    }

    #[test]
    fn test_other_errors_are_internal() {
        let err = BaldError::from(ContextError::not_configured("name"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = err.into_response();
        assert!(String::from_utf8_lossy(&response.body).contains("not configured"));
    }
}
