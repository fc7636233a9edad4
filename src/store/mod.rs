//! Persistence for models.
//!
//! An engine owns the tables; a session buffers additions until `commit`.
//! Controllers open a session per request and close it in their `post` hook,
//! which discards anything left uncommitted.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::AppContext;
use crate::error::{ConfigurationError, StoreError};
use crate::logging::SQL_TARGET;

type Tables = HashMap<&'static str, Vec<Value>>;

/// A database engine.
#[derive(Debug, Clone, Default)]
pub enum StoreEngine {
    /// Placeholder engine used before configuration. Every use fails.
    #[default]
    Unconfigured,
    Memory(Rc<RefCell<Tables>>),
}

impl StoreEngine {
    /// Create an engine from a URI such as `memory://`.
    pub fn connect(uri: &str) -> Result<Self, ConfigurationError> {
        match uri.split_once("://") {
            Some(("memory", _)) => Ok(Self::Memory(Rc::new(RefCell::new(HashMap::new())))),
            _ => Err(ConfigurationError::UnsupportedEngine(uri.to_string())),
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, Self::Unconfigured)
    }

    /// Open a session bound to this engine.
    pub fn session(&self) -> Result<Session, StoreError> {
        match self {
            Self::Unconfigured => Err(StoreError::NotConfigured),
            Self::Memory(tables) => Ok(Session {
                tables: tables.clone(),
                pending: Vec::new(),
            }),
        }
    }

    /// Number of committed rows in `table`.
    pub fn count(&self, table: &str) -> Result<usize, StoreError> {
        match self {
            Self::Unconfigured => Err(StoreError::NotConfigured),
            Self::Memory(tables) => Ok(tables.borrow().get(table).map_or(0, Vec::len)),
        }
    }
}

/// A unit of work against an engine.
#[derive(Debug)]
pub struct Session {
    tables: Rc<RefCell<Tables>>,
    pending: Vec<(&'static str, Value)>,
}

impl Session {
    /// Stage a model for insertion.
    pub fn add<M: Model>(&mut self, model: &M) -> Result<(), StoreError> {
        let row = serde_json::to_value(model).map_err(|source| StoreError::Serialize {
            table: M::TABLE.to_string(),
            source,
        })?;
        self.pending.push((M::TABLE, row));
        Ok(())
    }

    /// Write every staged row.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        let mut tables = self.tables.borrow_mut();
        for (table, row) in self.pending.drain(..) {
            tracing::info!(target: SQL_TARGET, table, %row, "INSERT");
            tables.entry(table).or_default().push(row);
        }
        Ok(())
    }

    /// Drop every staged row.
    pub fn rollback(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(target: SQL_TARGET, count = self.pending.len(), "ROLLBACK");
        }
        self.pending.clear();
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn query<M: Model>(&self) -> Query<'_, M> {
        Query {
            session: self,
            filters: Vec::new(),
            _model: PhantomData,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.rollback();
    }
}

/// A filtered lookup over one model's table.
pub struct Query<'s, M> {
    session: &'s Session,
    filters: Vec<(String, Value)>,
    _model: PhantomData<M>,
}

impl<M: Model> Query<'_, M> {
    /// Keep rows whose `field` equals `value`.
    pub fn filter_by(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn all(&self) -> Result<Vec<M>, StoreError> {
        tracing::info!(target: SQL_TARGET, table = M::TABLE, filters = ?self.filters, "SELECT");
        let tables = self.session.tables.borrow();
        let Some(rows) = tables.get(M::TABLE) else {
            return Ok(Vec::new());
        };
        rows.iter()
            .filter(|row| self.matches(row))
            .map(|row| {
                serde_json::from_value(row.clone()).map_err(|source| StoreError::Deserialize {
                    table: M::TABLE.to_string(),
                    source,
                })
            })
            .collect()
    }

    pub fn first(&self) -> Result<Option<M>, StoreError> {
        Ok(self.all()?.into_iter().next())
    }

    fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| row.get(field) == Some(expected))
    }
}

/// A persistent model.
pub trait Model: Serialize + DeserializeOwned + 'static {
    const TABLE: &'static str;

    /// Add this model to the model registry of `ctx`.
    fn register(ctx: &mut AppContext) -> bool
    where
        Self: Sized,
    {
        ctx.model_registry_mut().register::<Self>(Self::TABLE)
    }

    /// Stage this model, committing the whole session if asked to.
    fn save(&self, session: &mut Session, commit: bool) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        session.add(self)?;
        if commit {
            session.commit()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: u32,
        color: String,
    }

    impl Model for Widget {
        const TABLE: &'static str = "widgets";
    }

    fn widget(id: u32, color: &str) -> Widget {
        Widget {
            id,
            color: color.to_string(),
        }
    }

    #[test]
    fn test_unconfigured_engine_fails() {
        let engine = StoreEngine::default();
        assert!(matches!(engine.session(), Err(StoreError::NotConfigured)));
        assert!(!engine.is_configured());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        assert!(matches!(
            StoreEngine::connect("postgres://localhost/db"),
            Err(ConfigurationError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn test_commit_and_filter_by() {
        let engine = StoreEngine::connect("memory://").unwrap();
        let mut session = engine.session().unwrap();
        widget(1, "red").save(&mut session, false).unwrap();
        widget(2, "blue").save(&mut session, false).unwrap();
        widget(3, "red").save(&mut session, true).unwrap();

        let reds = session.query::<Widget>().filter_by("color", "red").all().unwrap();
        assert_eq!(reds, vec![widget(1, "red"), widget(3, "red")]);

        let blue = session
            .query::<Widget>()
            .filter_by("id", 2)
            .first()
            .unwrap();
        assert_eq!(blue, Some(widget(2, "blue")));
    }

    #[test]
    fn test_dropped_session_discards_pending() {
        let engine = StoreEngine::connect("memory://").unwrap();
        {
            let mut session = engine.session().unwrap();
            session.add(&widget(1, "red")).unwrap();
            assert_eq!(session.pending(), 1);
        }
        assert_eq!(engine.count("widgets").unwrap(), 0);

        let session = engine.session().unwrap();
        assert!(session.query::<Widget>().all().unwrap().is_empty());
    }
}
