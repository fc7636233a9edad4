//! Bald - a small MVC web framework.
//!
//! Applications are described by a stack of [`context::AppContext`]s. The
//! active context carries the project's configuration, its database engine,
//! its template engine and the controller and model registries. Controllers
//! are plain structs implementing [`controller::Controller`]; each action is
//! wrapped in a [`controller::Action`] and mounted on a [`routing::Router`].

#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod helpers;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod registry;
pub mod routing;
pub mod serve;
pub mod store;
pub mod template;

pub use error::BaldError;


/// The names most applications need.
pub mod prelude {
    pub use crate::config::ProjectConfig;
    pub use crate::context::{configure, AppContext, Configure, ContextStack};
    pub use crate::controller::{Action, BaseController, Controller, Page};
    pub use crate::error::{BaldError, ConfigurationError, HttpSignal};
    pub use crate::helpers::{humanize, plural, Img, Link};
    pub use crate::http::{ActionResult, Handler, Reply, Request, Response};
    pub use crate::middleware::{App, RequestLogger, UserManager};
    pub use crate::routing::Router;
    pub use crate::serve::{serve, AppFactory, ServeOptions};
    pub use crate::store::Model;
}
