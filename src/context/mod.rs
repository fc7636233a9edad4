//! Application contexts and the stack that holds them.
//!
//! The bottom of every [`ContextStack`] is a placeholder context. It answers
//! `config`, `engine` and the two registries with empty defaults so that
//! registration code can run before configuration, and fails with
//! [`ContextError::NotConfigured`] for everything else. Configuring replaces
//! the placeholder with a real context that inherits its registries.

pub mod configure;

pub use configure::{configure, Configure};

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;

use crate::config::ProjectConfig;
use crate::error::ContextError;
use crate::registry::Registry;
use crate::store::StoreEngine;
use crate::template::TemplateEngine;

/// One application: configuration, runtime singletons and registries.
#[derive(Debug, Default)]
pub struct AppContext {
    placeholder: bool,
    name: Option<String>,
    path: Option<PathBuf>,
    config: ProjectConfig,
    engine: StoreEngine,
    render: Option<TemplateEngine>,
    controller_registry: Registry,
    model_registry: Registry,
    values: IndexMap<String, Value>,
}

/// A value read from a context by key.
#[derive(Debug)]
pub enum ContextEntry<'a> {
    Name(&'a str),
    Path(&'a Path),
    Config(&'a ProjectConfig),
    Engine(&'a StoreEngine),
    ControllerRegistry(&'a Registry),
    ModelRegistry(&'a Registry),
    Value(&'a Value),
}

impl AppContext {
    /// The unconfigured sentinel.
    pub fn placeholder() -> Self {
        Self {
            placeholder: true,
            ..Self::default()
        }
    }

    /// A configured context. Registries start empty.
    pub fn new(name: impl Into<String>, path: PathBuf, config: ProjectConfig) -> Self {
        Self {
            placeholder: false,
            name: Some(name.into()),
            path: Some(path),
            config,
            ..Self::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn name(&self) -> Result<&str, ContextError> {
        self.name
            .as_deref()
            .ok_or_else(|| ContextError::not_configured("name"))
    }

    pub fn path(&self) -> Result<&Path, ContextError> {
        self.path
            .as_deref()
            .ok_or_else(|| ContextError::not_configured("path"))
    }

    /// The template engine materialized by the bootstrap sequence.
    pub fn templates(&self) -> Result<&TemplateEngine, ContextError> {
        self.render
            .as_ref()
            .ok_or_else(|| ContextError::not_configured("render"))
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn engine(&self) -> &StoreEngine {
        &self.engine
    }

    pub fn controller_registry(&self) -> &Registry {
        &self.controller_registry
    }

    pub fn controller_registry_mut(&mut self) -> &mut Registry {
        &mut self.controller_registry
    }

    pub fn model_registry(&self) -> &Registry {
        &self.model_registry
    }

    pub fn model_registry_mut(&mut self) -> &mut Registry {
        &mut self.model_registry
    }

    /// Store a runtime singleton under `key`.
    pub fn register(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Look up a built-in field or a registered value.
    pub fn get(&self, key: &str) -> Result<ContextEntry<'_>, ContextError> {
        match key {
            "config" => Ok(ContextEntry::Config(&self.config)),
            "engine" => Ok(ContextEntry::Engine(&self.engine)),
            "controller_registry" => Ok(ContextEntry::ControllerRegistry(&self.controller_registry)),
            "model_registry" => Ok(ContextEntry::ModelRegistry(&self.model_registry)),
            "name" => self.name().map(ContextEntry::Name),
            "path" => self.path().map(ContextEntry::Path),
            _ => self
                .values
                .get(key)
                .map(ContextEntry::Value)
                .ok_or_else(|| ContextError::not_configured(key)),
        }
    }

    pub(crate) fn set_engine(&mut self, engine: StoreEngine) {
        self.engine = engine;
    }

    pub(crate) fn set_templates(&mut self, render: TemplateEngine) {
        self.render = Some(render);
    }

    pub(crate) fn take_registries(&mut self) -> (Registry, Registry) {
        (
            std::mem::take(&mut self.controller_registry),
            std::mem::take(&mut self.model_registry),
        )
    }

    pub(crate) fn set_registries(&mut self, controllers: Registry, models: Registry) {
        self.controller_registry = controllers;
        self.model_registry = models;
    }
}

/// Last-in-first-out stack of contexts. Never empty.
#[derive(Debug)]
pub struct ContextStack {
    stack: Vec<AppContext>,
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStack {
    /// A stack holding only the placeholder.
    pub fn new() -> Self {
        Self {
            stack: vec![AppContext::placeholder()],
        }
    }

    /// Make `context` the active one.
    pub fn push(&mut self, context: AppContext) {
        tracing::debug!(depth = self.stack.len() + 1, name = ?context.name, "context pushed");
        self.stack.push(context);
    }

    /// Remove and return the active context. The bottom entry stays.
    pub fn pop(&mut self) -> Result<AppContext, ContextError> {
        if self.stack.len() <= 1 {
            return Err(ContextError::EmptyStack);
        }
        let context = self.stack.pop().ok_or(ContextError::EmptyStack)?;
        tracing::debug!(depth = self.stack.len(), name = ?context.name, "context popped");
        Ok(context)
    }

    pub fn active(&self) -> &AppContext {
        // The constructor seeds one entry and pop never removes the last.
        &self.stack[self.stack.len() - 1]
    }

    pub fn active_mut(&mut self) -> &mut AppContext {
        let top = self.stack.len() - 1;
        &mut self.stack[top]
    }

    /// Drop every context and reinstall a fresh placeholder.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.stack.push(AppContext::placeholder());
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Replace the top entry, returning the old one.
    pub(crate) fn replace_active(&mut self, context: AppContext) -> AppContext {
        std::mem::replace(self.active_mut(), context)
    }
}
