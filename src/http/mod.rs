//! Request/response types and the handler contract.
//!
//! A [`Handler`] is the framework's equivalent of a WSGI callable: it takes
//! the active application context and a request and produces a response or
//! an error for an outer layer to translate.

use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use indexmap::IndexMap;
use serde_json::Value;

use crate::context::AppContext;
use crate::error::BaldError;

/// Anything that can answer a request.
pub trait Handler {
    fn call(&self, ctx: &AppContext, req: Request) -> Result<Response, BaldError>;
}

impl<F> Handler for F
where
    F: Fn(&AppContext, Request) -> Result<Response, BaldError>,
{
    fn call(&self, ctx: &AppContext, req: Request) -> Result<Response, BaldError> {
        self(ctx, req)
    }
}

/// An inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: IndexMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Variables captured by the router from the path pattern.
    pub urlvars: IndexMap<String, String>,
    /// Request-scoped data set by upstream middleware (e.g. the current user).
    pub extension: IndexMap<String, Value>,
}

impl Request {
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, IndexMap::new()),
        };
        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            urlvars: IndexMap::new(),
            extension: IndexMap::new(),
        }
    }

    /// A GET request for `target`, which may carry a query string.
    pub fn blank(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extension.insert(key.into(), value);
        self
    }

    pub fn with_urlvar(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.urlvars.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Parse an `application/x-www-form-urlencoded` string.
pub fn parse_query(query: &str) -> IndexMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// An outbound response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// A 200 response with an HTML body.
    pub fn new(body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=UTF-8"),
        );
        Self {
            status: StatusCode::OK,
            headers,
            body: body.into(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What an action, hook or view hands back to the dispatcher.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A plain string body, wrapped into a 200 response.
    Text(String),
    Response(Response),
}

impl Reply {
    pub fn into_response(self) -> Response {
        match self {
            Reply::Text(body) => Response::new(body),
            Reply::Response(response) => response,
        }
    }
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Reply::Text(body)
    }
}

impl From<&str> for Reply {
    fn from(body: &str) -> Self {
        Reply::Text(body.to_string())
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

/// Result type of actions and hooks. `Ok(None)` means "nothing to say".
pub type ActionResult = Result<Option<Reply>, BaldError>;
