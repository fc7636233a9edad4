//! ERB-style template engine.
//!
//! Supports:
//! - `<%= expr %>` - HTML-escaped output
//! - `<%- expr %>` - Raw/unescaped output (no HTML escaping)
//! - `<% if/elsif/else/for/end %>` - Control flow
//!
//! Templates are located by key, `/<template_id>.<format>.template`, in the
//! project views directory first and then in the default template directory.

pub mod parser;
pub mod renderer;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use serde_json::{Map, Value};

use crate::config::ProjectConfig;
use crate::error::TemplateError;
use parser::{parse_template, TemplateNode};
use renderer::render_nodes;

/// Format used when neither the caller nor the data names one.
pub const DEFAULT_FORMAT: &str = "html";

/// Format used by `form_render` when the data names none.
pub const FORM_FORMAT: &str = "form";

/// Maximum size for the template cache to prevent unbounded memory growth.
const TEMPLATE_CACHE_MAX_SIZE: usize = 500;

/// A cached template with its parsed AST and modification time.
#[derive(Debug, Clone)]
struct CachedTemplate {
    nodes: Rc<Vec<TemplateNode>>,
    modified: SystemTime,
}

/// Template lookup key for an id and a format.
pub fn lookup_key(template_id: &str, format: &str) -> String {
    format!(
        "/{}.{}.template",
        template_id.to_lowercase(),
        format.to_lowercase()
    )
}

/// Renders views from a list of search directories.
#[derive(Debug)]
pub struct TemplateEngine {
    dirs: Vec<PathBuf>,
    filesystem_checks: bool,
    /// Parsed templates keyed by lookup key
    cache: RefCell<HashMap<String, (PathBuf, CachedTemplate)>>,
}

impl TemplateEngine {
    pub fn new(dirs: Vec<PathBuf>, filesystem_checks: bool) -> Self {
        Self {
            dirs,
            filesystem_checks,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Build the engine a project configuration asks for.
    pub fn from_config(root: &Path, config: &ProjectConfig) -> Self {
        let mut dirs = vec![config.views_dir(root)];
        if let Some(default) = &config.default_template_path {
            dirs.push(if default.is_absolute() {
                default.clone()
            } else {
                root.join(default)
            });
        }
        tracing::debug!(?dirs, checks = config.filesystem_checks(), "template engine");
        Self::new(dirs, config.filesystem_checks())
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Render `data["template_id"]` in the given format.
    ///
    /// The format is the explicit argument, else `data["format"]`, else html.
    pub fn render(&self, data: &Map<String, Value>, format: Option<&str>) -> Result<String, TemplateError> {
        let template_id = data
            .get("template_id")
            .and_then(Value::as_str)
            .ok_or_else(|| TemplateError::Render("render data has no template_id".to_string()))?;
        let format = format
            .or_else(|| data.get("format").and_then(Value::as_str))
            .unwrap_or(DEFAULT_FORMAT);
        self.render_key(&lookup_key(template_id, format), data)
    }

    /// Render a form template.
    ///
    /// The template id comes from `data["fieldset"]["template_id"]`, falling
    /// back to `forms/<template_name>`; the format defaults to `form`.
    pub fn form_render(
        &self,
        template_name: Option<&str>,
        mut data: Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let fieldset_id = data
            .get("fieldset")
            .and_then(|fs| fs.get("template_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let template_id = match (fieldset_id, template_name) {
            (Some(id), _) => id,
            (None, Some(name)) => format!("forms/{}", name),
            (None, None) => {
                return Err(TemplateError::Render(
                    "form_render needs a fieldset template_id or a template name".to_string(),
                ))
            }
        };
        let format = data
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or(FORM_FORMAT)
            .to_string();
        data.insert("template_id".to_string(), Value::String(template_id.clone()));
        self.render_key(&lookup_key(&template_id, &format), &data)
    }

    fn render_key(&self, key: &str, data: &Map<String, Value>) -> Result<String, TemplateError> {
        let (path, nodes) = self.get_template(key)?;
        render_nodes(&nodes, data).map_err(|message| {
            TemplateError::Render(format!("{} in {}", message, path.display()))
        })
    }

    /// Get a template from cache or load and parse it.
    fn get_template(&self, key: &str) -> Result<(PathBuf, Rc<Vec<TemplateNode>>), TemplateError> {
        if let Some((path, cached)) = self.cache.borrow().get(key) {
            if !self.filesystem_checks || modified_time(path) == Some(cached.modified) {
                return Ok((path.clone(), cached.nodes.clone()));
            }
            tracing::debug!(path = %path.display(), "template changed, reloading");
        }

        let path = self.resolve(key)?;
        let source = fs::read_to_string(&path).map_err(|source| TemplateError::Read {
            path: path.clone(),
            source,
        })?;
        let modified = modified_time(&path).unwrap_or(SystemTime::UNIX_EPOCH);
        let nodes = Rc::new(parse_template(&source).map_err(|message| TemplateError::Parse {
            message,
            path: path.clone(),
        })?);

        let mut cache = self.cache.borrow_mut();
        if cache.len() >= TEMPLATE_CACHE_MAX_SIZE {
            cache.clear();
        }
        cache.insert(
            key.to_string(),
            (
                path.clone(),
                CachedTemplate {
                    nodes: nodes.clone(),
                    modified,
                },
            ),
        );
        Ok((path, nodes))
    }

    /// Find the first directory holding `key`.
    fn resolve(&self, key: &str) -> Result<PathBuf, TemplateError> {
        let relative = key.trim_start_matches('/');
        self.dirs
            .iter()
            .map(|dir| dir.join(relative))
            .find(|path| path.is_file())
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))
    }

    /// Clear the template cache.
    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
