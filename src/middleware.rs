//! Middleware wrapped around the dispatch chain.
//!
//! Each layer is itself a [`Handler`]: it may adjust the request, delegate
//! to the inner handler and look at the result. [`App`] sits outside all of
//! them and is the only place where errors become responses.

use std::time::Instant;

use serde_json::Value;

use crate::context::{AppContext, ContextStack};
use crate::controller::USER_FIELD;
use crate::error::BaldError;
use crate::http::{Handler, Request, Response};

/// Looks up the user making a request.
pub trait UserSource {
    fn current_user(&self, ctx: &AppContext, req: &Request) -> Result<Option<Value>, BaldError>;
}

impl<F> UserSource for F
where
    F: Fn(&AppContext, &Request) -> Result<Option<Value>, BaldError>,
{
    fn current_user(&self, ctx: &AppContext, req: &Request) -> Result<Option<Value>, BaldError> {
        self(ctx, req)
    }
}

/// Sets the `user` extension entry for downstream controllers.
///
/// A user whose record carries `"can_login": false` is treated as absent.
pub struct UserManager<H, U> {
    inner: H,
    users: U,
}

impl<H: Handler, U: UserSource> UserManager<H, U> {
    pub fn new(inner: H, users: U) -> Self {
        Self { inner, users }
    }
}

impl<H: Handler, U: UserSource> Handler for UserManager<H, U> {
    fn call(&self, ctx: &AppContext, req: Request) -> Result<Response, BaldError> {
        let user = self
            .users
            .current_user(ctx, &req)?
            .filter(|user| user.get("can_login") != Some(&Value::Bool(false)))
            .unwrap_or(Value::Null);
        self.inner.call(ctx, req.with_extension(USER_FIELD, user))
    }
}

/// Logs every request with its status and latency.
pub struct RequestLogger<H> {
    inner: H,
}

impl<H: Handler> RequestLogger<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for RequestLogger<H> {
    fn call(&self, ctx: &AppContext, req: Request) -> Result<Response, BaldError> {
        let method = req.method.clone();
        let path = req.path.clone();
        let start = Instant::now();
        let result = self.inner.call(ctx, req);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(response) => tracing::info!(
                %method,
                %path,
                status = response.status.as_u16(),
                elapsed_ms,
                "request"
            ),
            Err(err) => tracing::warn!(
                %method,
                %path,
                status = err.status().as_u16(),
                elapsed_ms,
                error = %err,
                "request failed"
            ),
        }
        result
    }
}

/// A context stack with the handler chain serving it.
pub struct App {
    stack: ContextStack,
    handler: Box<dyn Handler>,
}

impl App {
    pub fn new(stack: ContextStack, handler: impl Handler + 'static) -> Self {
        Self {
            stack,
            handler: Box::new(handler),
        }
    }

    pub fn context(&self) -> &AppContext {
        self.stack.active()
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ContextStack {
        &mut self.stack
    }

    /// Answer a request against the active context. Never fails.
    pub fn respond(&self, req: Request) -> Response {
        match self.handler.call(self.stack.active(), req) {
            Ok(response) => response,
            Err(err) => {
                if err.status().is_server_error() {
                    tracing::error!(error = %err, "unhandled error");
                }
                err.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpSignal;
    use hyper::StatusCode;
    use serde_json::json;

    fn echo_user(_: &AppContext, req: Request) -> Result<Response, BaldError> {
        let user = req.extension.get(USER_FIELD).cloned().unwrap_or(Value::Null);
        Ok(Response::new(user.to_string()))
    }

    fn by_header(_: &AppContext, req: &Request) -> Result<Option<Value>, BaldError> {
        Ok(match req.param("as") {
            Some("ann") => Some(json!({"name": "ann"})),
            Some("banned") => Some(json!({"name": "bob", "can_login": false})),
            _ => None,
        })
    }

    #[test]
    fn test_user_manager_sets_extension() {
        let stack = ContextStack::new();
        let handler = UserManager::new(echo_user, by_header);

        let response = handler.call(stack.active(), Request::blank("/?as=ann")).unwrap();
        assert_eq!(response.text(), r#"{"name":"ann"}"#);

        let response = handler.call(stack.active(), Request::blank("/?as=banned")).unwrap();
        assert_eq!(response.text(), "null");

        let response = handler.call(stack.active(), Request::blank("/")).unwrap();
        assert_eq!(response.text(), "null");
    }

    #[test]
    fn test_app_translates_errors() {
        let failing = |_: &AppContext, _: Request| -> Result<Response, BaldError> {
            Err(HttpSignal::not_found(Some("no widget".to_string())).into())
        };
        let app = App::new(ContextStack::new(), RequestLogger::new(failing));
        let response = app.respond(Request::blank("/widgets/9"));
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "no widget");
    }

    #[test]
    fn test_app_reports_internal_errors() {
        let broken = |ctx: &AppContext, _: Request| -> Result<Response, BaldError> {
            ctx.name()?;
            Ok(Response::new("unreachable"))
        };
        let app = App::new(ContextStack::new(), broken);
        let response = app.respond(Request::blank("/"));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
