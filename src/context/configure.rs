//! The configuration step.
//!
//! Loads a project configuration, builds a new context from it and pushes it
//! onto a stack, then runs the bootstrap sequence that materializes the
//! template engine and the database engine.

use std::path::PathBuf;

use crate::config::{ConfigSource, ProjectConfig};
use crate::context::{AppContext, ContextStack};
use crate::error::ConfigurationError;
use crate::store::StoreEngine;
use crate::template::TemplateEngine;

/// Builder for one configuration call.
#[derive(Debug, Clone)]
pub struct Configure {
    name: String,
    root: Option<PathBuf>,
    config_file: Option<PathBuf>,
    config_object: Option<ProjectConfig>,
}

impl Configure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            config_file: None,
            config_object: None,
        }
    }

    /// Project root. Defaults to the working directory.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Configuration file, relative to the root unless absolute.
    pub fn config_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.config_file = Some(file.into());
        self
    }

    /// In-memory configuration. Takes priority over any file.
    pub fn config_object(mut self, config: ProjectConfig) -> Self {
        self.config_object = Some(config);
        self
    }

    /// Configure a new context on `stack` and return it.
    pub fn apply(self, stack: &mut ContextStack) -> Result<&mut AppContext, ConfigurationError> {
        let root = match self.root {
            Some(root) => root,
            None => std::env::current_dir()
                .map_err(|e| ConfigurationError::PathResolution(e.to_string()))?,
        };
        let config = ConfigSource::select(self.config_object, self.config_file).load(&root)?;

        // Materialize runtime singletons before touching the stack so a
        // failing bootstrap leaves it as it was.
        let engine = StoreEngine::connect(config.engine_uri())?;
        let render = TemplateEngine::from_config(&root, &config);

        let mut context = AppContext::new(self.name, root, config);
        context.set_engine(engine);
        context.set_templates(render);

        if stack.active().is_placeholder() {
            let mut placeholder = stack.replace_active(context);
            let (controllers, models) = placeholder.take_registries();
            let carried = std::mem::take(&mut placeholder.values);
            let active = stack.active_mut();
            active.set_registries(controllers, models);
            for (key, value) in carried {
                active.values.entry(key).or_insert(value);
            }
        } else {
            stack.push(context);
        }

        let active = stack.active_mut();
        tracing::info!(
            name = active.name().unwrap_or_default(),
            path = %active.path().map(|p| p.display().to_string()).unwrap_or_default(),
            controllers = active.controller_registry().len(),
            "configured"
        );
        Ok(active)
    }
}

/// Configure `name` from `project.yml` in the working directory.
pub fn configure(
    stack: &mut ContextStack,
    name: impl Into<String>,
) -> Result<&mut AppContext, ConfigurationError> {
    Configure::new(name).apply(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;
    use serde_json::json;
    use std::fs;

    struct EarlyController;
    struct LateController;

    #[test]
    fn test_placeholder_registries_carry_forward() {
        let mut stack = ContextStack::new();
        stack
            .active_mut()
            .controller_registry_mut()
            .register::<EarlyController>("EarlyController");

        let dir = tempfile::tempdir().unwrap();
        let ctx = Configure::new("app")
            .root(dir.path())
            .config_object(ProjectConfig::default())
            .apply(&mut stack)
            .unwrap();

        assert!(ctx.controller_registry().contains::<EarlyController>());
        assert_eq!(ctx.name().unwrap(), "app");
        assert!(ctx.templates().is_ok());
        assert!(ctx.engine().is_configured());
        assert_eq!(stack.depth(), 1);
        assert!(!stack.active().is_placeholder());
    }

    #[test]
    fn test_second_configure_pushes_fresh_context() {
        let mut stack = ContextStack::new();
        let dir = tempfile::tempdir().unwrap();
        Configure::new("first")
            .root(dir.path())
            .config_object(ProjectConfig::default())
            .apply(&mut stack)
            .unwrap()
            .controller_registry_mut()
            .register::<LateController>("LateController");

        let second = Configure::new("second")
            .root(dir.path())
            .config_object(ProjectConfig::default())
            .apply(&mut stack)
            .unwrap();
        assert!(second.controller_registry().is_empty());
        assert_eq!(stack.depth(), 2);

        let popped = stack.pop().unwrap();
        assert_eq!(popped.name().unwrap(), "second");
        assert!(stack.active().controller_registry().contains::<LateController>());
    }

    #[test]
    fn test_config_file_is_read_from_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("project.yml"), "env_name: dev\nmailer: smtp\n").unwrap();

        let mut stack = ContextStack::new();
        let ctx = Configure::new("app").root(dir.path()).apply(&mut stack).unwrap();
        assert_eq!(ctx.config().env_name.as_deref(), Some("dev"));
        assert_eq!(ctx.config().get("mailer"), Some(&json!("smtp")));
    }

    #[test]
    fn test_missing_config_leaves_stack_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = ContextStack::new();
        let err = Configure::new("app")
            .root(dir.path())
            .config_file("missing.yml")
            .apply(&mut stack)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ReadConfig { .. }));
        assert!(stack.active().is_placeholder());
        assert_eq!(stack.active().name().unwrap_err(), ContextError::not_configured("name"));
    }

    #[test]
    fn test_unsupported_engine_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig {
            database_engine_uri: Some("mysql://db".to_string()),
            ..ProjectConfig::default()
        };
        let mut stack = ContextStack::new();
        let err = Configure::new("app")
            .root(dir.path())
            .config_object(config)
            .apply(&mut stack)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedEngine(_)));
    }
}
