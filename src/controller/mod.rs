//! Controllers.
//!
//! A controller is created once per request. Its [`BaseController`] holds
//! the page, the current user and error, the per-request database session,
//! the template id of the running action, and the dynamic fields bound from
//! URL variables and request extensions.
//!
//! ```ignore
//! struct WidgetController {
//!     base: BaseController,
//! }
//!
//! impl Controller for WidgetController {
//!     const CLASS_NAME: &'static str = "WidgetController";
//!     const FIELDS: &'static [&'static str] = &["id"];
//!
//!     fn new(base: BaseController) -> Self {
//!         Self { base }
//!     }
//!     fn base(&self) -> &BaseController {
//!         &self.base
//!     }
//!     fn base_mut(&mut self) -> &mut BaseController {
//!         &mut self.base
//!     }
//! }
//! ```

pub mod action;
pub mod page;

pub use action::{template_base, underscore, Action, ActionFn};
pub use page::Page;

use std::path::Path;

use hyper::StatusCode;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::context::AppContext;
use crate::error::{BaldError, DispatchError, HttpSignal, StoreError};
use crate::http::{ActionResult, Request, Response};
use crate::store::Session;

/// Names owned by the base controller. Request data may not bind to them.
pub const RESERVED_FIELDS: &[&str] = &["page", "template_id", "session", "error"];

/// Extension key that binds to the base `user` slot.
pub const USER_FIELD: &str = "user";

/// Per-request state shared by every controller.
#[derive(Debug)]
pub struct BaseController {
    pub page: Page,
    pub error: Option<String>,
    pub user: Option<Value>,
    pub template_id: String,
    session: Option<Session>,
    fields: IndexMap<String, Value>,
    options: IndexMap<String, Value>,
}

impl BaseController {
    /// Seed a controller from the active context.
    pub fn new(ctx: &AppContext) -> Self {
        let config = ctx.config();
        let root = ctx.path().unwrap_or_else(|_| Path::new("."));
        Self {
            page: Page::new(config.media_version.clone(), config.assets_dir(root)),
            error: None,
            user: None,
            template_id: String::new(),
            session: None,
            fields: IndexMap::new(),
            options: config.page_options.clone(),
        }
    }

    /// Bind request data onto a declared field.
    pub fn bind(
        &mut self,
        controller: &str,
        declared: &[&str],
        key: &str,
        value: Value,
    ) -> Result<(), DispatchError> {
        if key == USER_FIELD {
            self.user = (!value.is_null()).then_some(value);
            return Ok(());
        }
        if RESERVED_FIELDS.contains(&key) {
            return Err(DispatchError::ReservedField {
                controller: controller.to_string(),
                field: key.to_string(),
            });
        }
        if !declared.contains(&key) {
            return Err(DispatchError::UndeclaredField {
                controller: controller.to_string(),
                field: key.to_string(),
            });
        }
        self.fields.insert(key.to_string(), value);
        Ok(())
    }

    /// A bound dynamic field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A bound dynamic field holding a string.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// A page option from the project configuration.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    /// Everything a view sees when no explicit data is given.
    ///
    /// Page options come first so that bound fields and base state win on
    /// a name clash.
    pub fn view_context(&self) -> Map<String, Value> {
        let mut data: Map<String, Value> = self
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &self.fields {
            data.insert(key.clone(), value.clone());
        }
        data.insert(
            "page".to_string(),
            serde_json::to_value(&self.page).unwrap_or(Value::Null),
        );
        data.insert("user".to_string(), self.user.clone().unwrap_or(Value::Null));
        data.insert(
            "error".to_string(),
            self.error.clone().map_or(Value::Null, Value::String),
        );
        data.insert(
            "template_id".to_string(),
            Value::String(self.template_id.clone()),
        );
        data
    }

    /// Render the view for the current template id.
    ///
    /// Uses `data` when given and non-empty, else [`Self::view_context`].
    /// The template id is always forced into the render data.
    pub fn view(&self, ctx: &AppContext, data: Option<Map<String, Value>>) -> Result<String, BaldError> {
        let render = ctx.templates()?;
        let data = match data {
            Some(mut data) if !data.is_empty() => {
                data.insert(
                    "template_id".to_string(),
                    Value::String(self.template_id.clone()),
                );
                data
            }
            _ => self.view_context(),
        };
        Ok(render.render(&data, None)?)
    }

    /// The request's database session, opened on first use.
    pub fn session(&mut self, ctx: &AppContext) -> Result<&mut Session, StoreError> {
        if self.session.is_none() {
            self.session = Some(ctx.engine().session()?);
        }
        self.session.as_mut().ok_or(StoreError::NotConfigured)
    }

    /// Close the session, discarding uncommitted work.
    pub fn close_session(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!(template_id = %self.template_id, "session closed");
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Redirect to `url`.
    pub fn redirect_to(&self, url: impl Into<String>) -> ActionResult {
        Err(HttpSignal::redirect(url).into())
    }

    /// Abort with a 404.
    pub fn not_found(&self, message: Option<&str>) -> ActionResult {
        Err(HttpSignal::not_found(message.map(str::to_string)).into())
    }

    /// Abort with an arbitrary status.
    pub fn status(&self, code: u16) -> ActionResult {
        let status = StatusCode::from_u16(code).map_err(|_| DispatchError::InvalidStatus(code))?;
        Err(HttpSignal::new(status).into())
    }
}

/// A request handler class.
///
/// Every action runs on a fresh instance built by [`Controller::new`].
pub trait Controller: Sized + 'static {
    /// Type name in `<Name>Controller` form. Drives the template id.
    const CLASS_NAME: &'static str;

    /// Names that URL variables and extension data may bind to.
    const FIELDS: &'static [&'static str] = &[];

    fn new(base: BaseController) -> Self;

    fn base(&self) -> &BaseController;

    fn base_mut(&mut self) -> &mut BaseController;

    /// Runs before every action. A reply short-circuits the action.
    fn pre(&mut self, _ctx: &AppContext, _req: &Request) -> ActionResult {
        Ok(None)
    }

    /// Runs after every action, with the outgoing response.
    fn post(&mut self, _ctx: &AppContext, _req: &Request, _resp: &Response) -> Result<(), BaldError> {
        self.base_mut().close_session();
        Ok(())
    }

    fn view(&self, ctx: &AppContext, data: Option<Map<String, Value>>) -> Result<String, BaldError> {
        self.base().view(ctx, data)
    }

    fn bind(&mut self, key: &str, value: Value) -> Result<(), DispatchError> {
        self.base_mut().bind(Self::CLASS_NAME, Self::FIELDS, key, value)
    }

    /// Add this controller to the controller registry of `ctx`.
    fn register(ctx: &mut AppContext) -> bool {
        ctx.controller_registry_mut().register::<Self>(Self::CLASS_NAME)
    }
}

/// The default `index` action: renders the controller's view.
pub fn index<C: Controller>(_controller: &mut C, _ctx: &AppContext, _req: &Request) -> ActionResult {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::context::ContextStack;
    use crate::context::Configure;
    use serde_json::json;

    fn configured(stack: &mut ContextStack, config: ProjectConfig) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        Configure::new("app")
            .root(dir.path())
            .config_object(config)
            .apply(stack)
            .unwrap();
        dir
    }

    #[test]
    fn test_bind_rules() {
        let stack = ContextStack::new();
        let mut base = BaseController::new(stack.active());
        base.bind("WidgetController", &["id"], "id", json!("42")).unwrap();
        assert_eq!(base.field_str("id"), Some("42"));

        assert_eq!(
            base.bind("WidgetController", &["id"], "color", json!("red")),
            Err(DispatchError::UndeclaredField {
                controller: "WidgetController".to_string(),
                field: "color".to_string(),
            })
        );
        assert!(matches!(
            base.bind("WidgetController", &["page"], "page", json!(1)),
            Err(DispatchError::ReservedField { .. })
        ));

        base.bind("WidgetController", &[], "user", json!({"name": "ann"})).unwrap();
        assert_eq!(base.user, Some(json!({"name": "ann"})));
        base.bind("WidgetController", &[], "user", Value::Null).unwrap();
        assert_eq!(base.user, None);
    }

    #[test]
    fn test_page_options_never_shadow_base_fields() {
        let mut stack = ContextStack::new();
        let mut options = IndexMap::new();
        options.insert("site_name".to_string(), json!("Widgets"));
        options.insert("template_id".to_string(), json!("hijacked"));
        let config = ProjectConfig {
            page_options: options,
            media_version: Some("7".to_string()),
            ..ProjectConfig::default()
        };
        let _dir = configured(&mut stack, config);

        let mut base = BaseController::new(stack.active());
        base.template_id = "widget".to_string();
        let data = base.view_context();
        assert_eq!(data["site_name"], json!("Widgets"));
        assert_eq!(data["template_id"], json!("widget"));
        assert_eq!(data["page"]["version"], json!("7"));
        assert_eq!(base.option("site_name"), Some(&json!("Widgets")));
    }

    #[test]
    fn test_signals() {
        let stack = ContextStack::new();
        let base = BaseController::new(stack.active());

        let err = base.not_found(Some("gone")).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = base.status(418).unwrap_err();
        assert_eq!(err.status(), StatusCode::IM_A_TEAPOT);

        assert!(matches!(
            base.status(42),
            Err(BaldError::Dispatch(DispatchError::InvalidStatus(42)))
        ));

        let err = base.redirect_to("/login").unwrap_err();
        assert_eq!(err.status(), StatusCode::FOUND);
    }

    #[test]
    fn test_session_requires_configuration() {
        let stack = ContextStack::new();
        let mut base = BaseController::new(stack.active());
        assert!(matches!(base.session(stack.active()), Err(StoreError::NotConfigured)));

        let mut stack = ContextStack::new();
        let _dir = configured(&mut stack, ProjectConfig::default());
        let mut base = BaseController::new(stack.active());
        base.session(stack.active()).unwrap();
        assert!(base.has_session());
        base.close_session();
        assert!(!base.has_session());
    }
}
