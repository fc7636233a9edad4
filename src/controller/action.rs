//! The action dispatcher.
//!
//! An [`Action`] wraps one controller method as a [`Handler`]. Per request it
//! builds a fresh controller, binds URL variables and extension data onto
//! it, then resolves a reply from the `pre` hook, the action itself, or the
//! default view, in that order. Errors are never caught here.

use std::fmt;

use serde_json::Value;

use crate::context::AppContext;
use crate::controller::{BaseController, Controller};
use crate::error::{BaldError, ConfigurationError};
use crate::http::{ActionResult, Handler, Reply, Request, Response};

/// Signature of an action method.
pub type ActionFn<C> = fn(&mut C, &AppContext, &Request) -> ActionResult;

/// Action names that map to the bare controller template.
const BARE_ACTIONS: &[&str] = &["index", "__call__"];

/// A controller method bound for dispatch.
pub struct Action<C> {
    name: &'static str,
    template_id: String,
    func: ActionFn<C>,
}

impl<C: Controller> Action<C> {
    /// Wrap `func` as the action `name` of `C`.
    ///
    /// Fails when `C::CLASS_NAME` is not of the form `<Name>Controller`.
    pub fn new(name: &'static str, func: ActionFn<C>) -> Result<Self, ConfigurationError> {
        let base = template_base(C::CLASS_NAME)?;
        let template_id = if BARE_ACTIONS.contains(&name) {
            base
        } else {
            format!("{}/{}", base, name)
        };
        Ok(Self {
            name,
            template_id,
            func,
        })
    }

    /// The default `index` action.
    pub fn index() -> Result<Self, ConfigurationError> {
        Self::new("index", crate::controller::index::<C>)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    fn resolve(&self, controller: &mut C, ctx: &AppContext, req: &Request) -> Result<Reply, BaldError> {
        if let Some(reply) = controller.pre(ctx, req)? {
            return Ok(reply);
        }
        if let Some(reply) = (self.func)(controller, ctx, req)? {
            return Ok(reply);
        }
        Ok(Reply::Text(controller.view(ctx, None)?))
    }
}

impl<C: Controller> Handler for Action<C> {
    fn call(&self, ctx: &AppContext, req: Request) -> Result<Response, BaldError> {
        let mut controller = C::new(BaseController::new(ctx));

        for (key, value) in &req.urlvars {
            controller.bind(key, Value::String(value.clone()))?;
        }
        controller.base_mut().template_id = self.template_id.clone();
        for (key, value) in &req.extension {
            controller.bind(key, value.clone())?;
        }

        tracing::debug!(
            controller = C::CLASS_NAME,
            action = self.name,
            template_id = %self.template_id,
            "dispatch"
        );

        let response = self.resolve(&mut controller, ctx, &req)?.into_response();
        controller.post(ctx, &req, &response)?;
        Ok(response)
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("template_id", &self.template_id)
            .finish()
    }
}

/// Template directory for a controller class name.
///
/// `WidgetController` → `widget`; `app::BlogPostController` → `blog_post`.
pub fn template_base(class_name: &str) -> Result<String, ConfigurationError> {
    let short = class_name.rsplit("::").next().unwrap_or(class_name);
    match short.strip_suffix("Controller") {
        Some(stem) if !stem.is_empty() && stem.chars().all(|c| c.is_alphanumeric() || c == '_') => {
            Ok(underscore(stem))
        }
        _ => Err(ConfigurationError::ControllerName(class_name.to_string())),
    }
}

/// Convert `CamelCase` to `snake_case`.
///
/// Acronyms stay together: `HTTPServer` → `http_server`.
pub fn underscore(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && prev != '_' {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainController {
        base: BaseController,
    }

    impl Controller for PlainController {
        const CLASS_NAME: &'static str = "PlainController";

        fn new(base: BaseController) -> Self {
            Self { base }
        }
        fn base(&self) -> &BaseController {
            &self.base
        }
        fn base_mut(&mut self) -> &mut BaseController {
            &mut self.base
        }
    }

    struct Misnamed {
        base: BaseController,
    }

    impl Controller for Misnamed {
        const CLASS_NAME: &'static str = "Misnamed";

        fn new(base: BaseController) -> Self {
            Self { base }
        }
        fn base(&self) -> &BaseController {
            &self.base
        }
        fn base_mut(&mut self) -> &mut BaseController {
            &mut self.base
        }
    }

    fn noop(_: &mut PlainController, _: &AppContext, _: &Request) -> ActionResult {
        Ok(None)
    }

    #[test]
    fn test_underscore() {
        assert_eq!(underscore("Widget"), "widget");
        assert_eq!(underscore("BlogPost"), "blog_post");
        assert_eq!(underscore("HTTPServer"), "http_server");
        assert_eq!(underscore("Api2Key"), "api2_key");
    }

    #[test]
    fn test_template_base() {
        assert_eq!(template_base("WidgetController").unwrap(), "widget");
        assert_eq!(template_base("app::BlogPostController").unwrap(), "blog_post");
        assert!(matches!(
            template_base("Controller"),
            Err(ConfigurationError::ControllerName(_))
        ));
        assert!(template_base("WidgetHandler").is_err());
    }

    #[test]
    fn test_template_ids() {
        assert_eq!(Action::<PlainController>::index().unwrap().template_id(), "plain");
        assert_eq!(Action::<PlainController>::new("__call__", noop).unwrap().template_id(), "plain");
        assert_eq!(Action::<PlainController>::new("edit", noop).unwrap().template_id(), "plain/edit");
        // Only an exact name is bare.
        assert_eq!(Action::<PlainController>::new("reindex", noop).unwrap().template_id(), "plain/reindex");
    }

    #[test]
    fn test_bad_class_name_fails_at_construction() {
        let err = Action::<Misnamed>::index().unwrap_err();
        assert!(matches!(err, ConfigurationError::ControllerName(name) if name == "Misnamed"));
    }
}
