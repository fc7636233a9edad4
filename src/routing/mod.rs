//! Request routing.
//!
//! Patterns are `/`-separated segments. `:name` captures one segment and a
//! trailing `*name` captures the rest of the path. Captures are handed to
//! the matched handler as the request's URL variables.
//!
//! Controllers are wired by convention with [`Router::mount`]:
//! - `home` controller maps to root `/`, any other to `/<name>`
//! - `index` → GET on the collection
//! - `show` → GET `/<name>/:id`, `edit` → GET `/<name>/:id/edit`
//! - `new` → GET `/<name>/new`, `create` → POST on the collection
//! - `update` → PUT `/<name>/:id`, `destroy` → DELETE `/<name>/:id`
//! - Other actions → GET `/<name>/<action>`

use hyper::Method;
use indexmap::IndexMap;

use crate::context::AppContext;
use crate::controller::{template_base, Action, Controller, USER_FIELD};
use crate::error::{BaldError, ConfigurationError, HttpSignal};
use crate::http::{Handler, Request, Response};

/// One routing table entry.
pub struct Route {
    pub method: Method,
    pub pattern: String,
    pub name: Option<String>,
    handler: Box<dyn Handler>,
}

/// Ordered routing table. The first matching route wins.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an anonymous route.
    pub fn connect(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, ConfigurationError> {
        self.add(method, pattern, None, Box::new(handler))
    }

    /// Add a route that `url_for` can build by name.
    pub fn name(
        &mut self,
        name: &str,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, ConfigurationError> {
        self.add(method, pattern, Some(name.to_string()), Box::new(handler))
    }

    fn add(
        &mut self,
        method: Method,
        pattern: &str,
        name: Option<String>,
        handler: Box<dyn Handler>,
    ) -> Result<&mut Self, ConfigurationError> {
        validate_pattern(pattern)?;
        if let Some(name) = &name {
            if self.routes.iter().any(|r| r.name.as_ref() == Some(name)) {
                return Err(ConfigurationError::InvalidRoute(format!(
                    "duplicate route name '{}'",
                    name
                )));
            }
        }
        tracing::debug!(%method, pattern, name = ?name, "route");
        self.routes.push(Route {
            method,
            pattern: pattern.to_string(),
            name,
            handler,
        });
        Ok(self)
    }

    /// Wire the actions of `C` by convention.
    ///
    /// Each route is named after its action's template id, so
    /// `url_for("widget/edit", ..)` builds the edit URL of `WidgetController`.
    /// `C` must be registered in `ctx` and declare every URL variable its
    /// routes capture. Nothing is added when any action fails these checks.
    pub fn mount<C: Controller>(
        &mut self,
        ctx: &AppContext,
        actions: Vec<Action<C>>,
    ) -> Result<&mut Self, ConfigurationError> {
        if !ctx.controller_registry().contains::<C>() {
            return Err(ConfigurationError::Unregistered(C::CLASS_NAME.to_string()));
        }
        let base_path = controller_base_path(&template_base(C::CLASS_NAME)?);
        let mut wired = Vec::with_capacity(actions.len());
        for action in actions {
            let Some((method, path)) = derive_route(&base_path, action.name()) else {
                continue;
            };
            let undeclared = captures(&path)
                .find(|name| *name != USER_FIELD && !C::FIELDS.iter().any(|field| field == name))
                .map(str::to_string);
            if let Some(field) = undeclared {
                return Err(ConfigurationError::UndeclaredCapture {
                    controller: C::CLASS_NAME.to_string(),
                    field,
                    pattern: path,
                });
            }
            wired.push((method, path, action));
        }
        for (method, path, action) in wired {
            let name = action.template_id().to_string();
            self.add(method, &path, Some(name), Box::new(action))?;
        }
        Ok(self)
    }

    /// Build the URL of a named route.
    ///
    /// Parameters not consumed by the pattern become the query string.
    pub fn url_for(&self, name: &str, params: &IndexMap<String, String>) -> Result<String, ConfigurationError> {
        let route = self
            .routes
            .iter()
            .find(|r| r.name.as_deref() == Some(name))
            .ok_or_else(|| ConfigurationError::InvalidRoute(format!("no route named '{}'", name)))?;

        let mut used = Vec::new();
        let mut segments = Vec::new();
        for segment in route.pattern.split('/') {
            if let Some(var) = segment.strip_prefix(':').or_else(|| segment.strip_prefix('*')) {
                let value = params.get(var).ok_or_else(|| {
                    ConfigurationError::InvalidRoute(format!(
                        "route '{}' needs parameter '{}'",
                        name, var
                    ))
                })?;
                used.push(var);
                if segment.starts_with('*') {
                    segments.push(value.trim_start_matches('/').to_string());
                } else {
                    segments.push(urlencoding::encode(value).into_owned());
                }
            } else {
                segments.push(segment.to_string());
            }
        }

        let mut url = segments.join("/");
        if url.is_empty() {
            url.push('/');
        }
        let query: Vec<String> = params
            .iter()
            .filter(|(key, _)| !used.contains(&key.as_str()))
            .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
            .collect();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        Ok(url)
    }

    /// A redirect signal to a named route.
    pub fn redirect_to(&self, name: &str, params: &IndexMap<String, String>) -> BaldError {
        match self.url_for(name, params) {
            Ok(url) => HttpSignal::redirect(url).into(),
            Err(e) => e.into(),
        }
    }

    /// Method, pattern and name of every route, in match order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str, Option<&str>)> {
        self.routes
            .iter()
            .map(|r| (&r.method, r.pattern.as_str(), r.name.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Handler for Router {
    fn call(&self, ctx: &AppContext, mut req: Request) -> Result<Response, BaldError> {
        for route in &self.routes {
            if route.method != req.method {
                continue;
            }
            if let Some(vars) = match_path(&route.pattern, &req.path) {
                req.urlvars.extend(vars);
                return route.handler.call(ctx, req);
            }
        }
        tracing::debug!(method = %req.method, path = %req.path, "no route");
        Err(HttpSignal::not_found(None).into())
    }
}

fn validate_pattern(pattern: &str) -> Result<(), ConfigurationError> {
    if !pattern.starts_with('/') {
        return Err(ConfigurationError::InvalidRoute(format!(
            "pattern '{}' must start with '/'",
            pattern
        )));
    }
    let segments: Vec<&str> = pattern.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.starts_with('*') && i != segments.len() - 1 {
            return Err(ConfigurationError::InvalidRoute(format!(
                "splat must be the last segment in '{}'",
                pattern
            )));
        }
        if *segment == ":" || *segment == "*" {
            return Err(ConfigurationError::InvalidRoute(format!(
                "unnamed capture in '{}'",
                pattern
            )));
        }
    }
    Ok(())
}

/// Names captured by `:name` and `*name` segments of `pattern`.
fn captures(pattern: &str) -> impl Iterator<Item = &str> {
    pattern
        .split('/')
        .filter_map(|segment| segment.strip_prefix(':').or_else(|| segment.strip_prefix('*')))
}

/// Match `path` against `pattern`, returning the captured variables.
pub fn match_path(pattern: &str, path: &str) -> Option<IndexMap<String, String>> {
    // Fast path: exact match (no params)
    if pattern == path {
        return Some(IndexMap::new());
    }

    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let path_parts: Vec<&str> = path.split('/').collect();
    let has_splat = pattern_parts.last().map_or(false, |p| p.starts_with('*'));

    if !has_splat && pattern_parts.len() != path_parts.len() {
        return None;
    }
    if has_splat && pattern_parts.len() > path_parts.len() {
        return None;
    }

    let mut params = IndexMap::new();
    for (i, pat) in pattern_parts.iter().enumerate() {
        if let Some(param_name) = pat.strip_prefix('*') {
            // Consume all remaining path parts
            let captured = path_parts[i..].join("/");
            params.insert(param_name.to_string(), format!("/{}", captured));
            break;
        }
        let actual = path_parts[i];
        if let Some(param_name) = pat.strip_prefix(':') {
            if actual.is_empty() {
                return None;
            }
            let decoded = urlencoding::decode(actual)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| actual.to_string());
            params.insert(param_name.to_string(), decoded);
        } else if *pat != actual {
            return None;
        }
    }

    Some(params)
}

/// Get the base path for a controller's template base.
///
/// - `home` → `/`
/// - `users` → `/users`
pub fn controller_base_path(base: &str) -> String {
    if base == "home" {
        "/".to_string()
    } else {
        format!("/{}", base)
    }
}

/// Derive the method and path of an action from its name.
fn derive_route(base_path: &str, action: &str) -> Option<(Method, String)> {
    // Skip private/helper functions (starting with _)
    if action.starts_with('_') {
        return None;
    }

    let prefix = if base_path == "/" { "" } else { base_path };
    let route = match action {
        "index" => (Method::GET, base_path.to_string()),
        "show" => (Method::GET, format!("{}/:id", prefix)),
        "new" => (Method::GET, format!("{}/new", prefix)),
        "create" => (Method::POST, base_path.to_string()),
        "edit" => (Method::GET, format!("{}/:id/edit", prefix)),
        "update" => (Method::PUT, format!("{}/:id", prefix)),
        "destroy" => (Method::DELETE, format!("{}/:id", prefix)),
        _ => (Method::GET, format!("{}/{}", prefix, action)),
    };
    Some(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStack;
    use crate::controller::BaseController;
    use crate::http::ActionResult;
    use hyper::StatusCode;
    use pretty_assertions::assert_eq;

    struct UsersController {
        base: BaseController,
    }

    impl Controller for UsersController {
        const CLASS_NAME: &'static str = "UsersController";
        const FIELDS: &'static [&'static str] = &["id"];

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

    fn show(c: &mut UsersController, _: &AppContext, _: &Request) -> ActionResult {
        Ok(Some(format!("user {}", c.base().field_str("id").unwrap_or("?")).into()))
    }

    fn params(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_match_path() {
        assert_eq!(match_path("/users", "/users"), Some(IndexMap::new()));
        assert_eq!(
            match_path("/users/:id", "/users/123"),
            Some(params(&[("id", "123")]))
        );
        assert_eq!(match_path("/users/:id", "/users"), None);
        assert_eq!(match_path("/users/:id", "/users/"), None);
        assert_eq!(
            match_path("/files/*path", "/files/a/b.txt"),
            Some(params(&[("path", "/a/b.txt")]))
        );
        assert_eq!(match_path("/posts/:id/edit", "/posts/1/show"), None);
    }

    #[test]
    fn test_controller_base_path() {
        assert_eq!(controller_base_path("home"), "/");
        assert_eq!(controller_base_path("blog_posts"), "/blog_posts");
    }

    #[test]
    fn test_derive_routes() {
        assert_eq!(derive_route("/users", "index"), Some((Method::GET, "/users".to_string())));
        assert_eq!(derive_route("/users", "create"), Some((Method::POST, "/users".to_string())));
        assert_eq!(derive_route("/users", "edit"), Some((Method::GET, "/users/:id/edit".to_string())));
        assert_eq!(derive_route("/", "show"), Some((Method::GET, "/:id".to_string())));
        assert_eq!(derive_route("/", "about"), Some((Method::GET, "/about".to_string())));
        assert_eq!(derive_route("/users", "_helper"), None);
    }

    #[test]
    fn test_invalid_patterns() {
        let mut router = Router::new();
        let handler = |_: &AppContext, _: Request| Ok::<_, BaldError>(Response::new("x"));
        assert!(router.connect(Method::GET, "users", handler).is_err());
        assert!(router.connect(Method::GET, "/*rest/more", handler).is_err());
        assert!(router.connect(Method::GET, "/a/:", handler).is_err());
    }

    #[test]
    fn test_url_for() {
        let mut router = Router::new();
        let handler = |_: &AppContext, _: Request| Ok::<_, BaldError>(Response::new("x"));
        router.name("user", Method::GET, "/users/:id", handler).unwrap();
        router.name("root", Method::GET, "/", handler).unwrap();

        assert_eq!(router.url_for("user", &params(&[("id", "7")])).unwrap(), "/users/7");
        assert_eq!(
            router.url_for("user", &params(&[("id", "7"), ("tab", "a b")])).unwrap(),
            "/users/7?tab=a%20b"
        );
        assert_eq!(router.url_for("root", &IndexMap::new()).unwrap(), "/");
        assert!(router.url_for("user", &IndexMap::new()).is_err());
        assert!(router.url_for("nope", &IndexMap::new()).is_err());

        let signal = router.redirect_to("user", &params(&[("id", "7")]));
        assert_eq!(signal.status(), StatusCode::FOUND);
    }

    #[test]
    fn test_mount_requires_registration() {
        let mut stack = ContextStack::new();
        let mut router = Router::new();
        let err = router
            .mount::<UsersController>(stack.active(), vec![Action::<UsersController>::new("show", show).unwrap()])
            .err();
        assert!(matches!(err, Some(ConfigurationError::Unregistered(_))));

        UsersController::register(stack.active_mut());
        router
            .mount::<UsersController>(stack.active(), vec![Action::<UsersController>::new("show", show).unwrap()])
            .unwrap();

        let response = router.call(stack.active(), Request::blank("/users/42")).unwrap();
        assert_eq!(response.text(), "user 42");
        assert_eq!(router.url_for("users/show", &params(&[("id", "42")])).unwrap(), "/users/42");

        let err = router.call(stack.active(), Request::blank("/nowhere")).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    struct BareController {
        base: BaseController,
    }

    impl Controller for BareController {
        const CLASS_NAME: &'static str = "BareController";

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

    fn bare_show(_: &mut BareController, _: &AppContext, _: &Request) -> ActionResult {
        Ok(Some("bare".into()))
    }

    #[test]
    fn test_mount_rejects_undeclared_captures() {
        let mut stack = ContextStack::new();
        BareController::register(stack.active_mut());
        let mut router = Router::new();

        let err = router
            .mount::<BareController>(
                stack.active(),
                vec![
                    Action::<BareController>::index().unwrap(),
                    Action::<BareController>::new("show", bare_show).unwrap(),
                ],
            )
            .err();
        assert!(matches!(
            err,
            Some(ConfigurationError::UndeclaredCapture { ref field, ref pattern, .. })
                if field == "id" && pattern == "/bare/:id"
        ));
        assert!(router.is_empty());

        // Routes without captures need no declared fields.
        router
            .mount::<BareController>(stack.active(), vec![Action::<BareController>::index().unwrap()])
            .unwrap();
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_captures() {
        assert_eq!(captures("/users/:id/edit").collect::<Vec<_>>(), vec!["id"]);
        assert_eq!(captures("/files/:bucket/*path").collect::<Vec<_>>(), vec!["bucket", "path"]);
        assert_eq!(captures("/users").count(), 0);
    }
}
