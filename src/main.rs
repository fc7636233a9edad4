//! Bald command line.
//!
//! `bald new <name>` creates a project skeleton, `bald check` prints how a
//! project configures, and `bald serve` runs it with the built-in home
//! controller.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use bald::config::ConfigSource;
use bald::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "bald", version = VERSION, about = "A small MVC web framework")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new project
    New {
        /// Project directory to create
        name: String,
    },
    /// Configure a project and print what it resolved to
    Check {
        /// Project root
        #[arg(default_value = ".")]
        folder: PathBuf,
    },
    /// Serve a project
    Serve {
        /// Project root
        #[arg(default_value = ".")]
        folder: PathBuf,
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        /// Worker threads (defaults to the number of CPUs)
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

const PROJECT_TEMPLATE: &str = r#"debug: true
template_filesystem_check: true
media_version: "1"
page_options:
  project: "{name}"
logging:
  level: info
"#;

const HOME_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title><% if page.title %><%= page.title %><% else %><%= project %><% end %></title>
</head>
<body>
  <h1>Welcome to <%= project %></h1>
  <% if user %><p>Signed in as <%= user.name %></p><% end %>
</body>
</html>
"#;

/// Renders `app/views/home.html.template` at `/`.
struct HomeController {
    base: BaseController,
}

impl Controller for HomeController {
    const CLASS_NAME: &'static str = "HomeController";

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

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::New { name } => create_project(&name),
        Command::Check { folder } => check_project(&folder),
        Command::Serve {
            folder,
            port,
            workers,
        } => serve_project(folder, port, workers),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        process::exit(1);
    }
}

fn create_project(name: &str) -> Result<(), BaldError> {
    let root = Path::new(name);
    if root.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("directory '{}' already exists", name),
        )
        .into());
    }

    fs::create_dir_all(root.join("app/views"))?;
    fs::create_dir_all(root.join("content/js"))?;
    fs::create_dir_all(root.join("content/css"))?;
    fs::write(
        root.join("project.yml"),
        PROJECT_TEMPLATE.replace("{name}", name),
    )?;
    fs::write(root.join("app/views/home.html.template"), HOME_TEMPLATE)?;

    println!("{} {}", "created".green().bold(), name);
    println!("  cd {} && bald serve", name);
    Ok(())
}

fn check_project(folder: &Path) -> Result<(), BaldError> {
    let mut stack = ContextStack::new();
    let ctx = Configure::new(project_name(folder)).root(folder).apply(&mut stack)?;
    HomeController::register(ctx);

    println!("{} {}", "project".bold(), ctx.name()?.cyan());
    println!("  root       {}", ctx.path()?.display());
    println!("  engine     {}", ctx.config().engine_uri());
    println!(
        "  fs checks  {}",
        if ctx.config().filesystem_checks() { "on" } else { "off" }
    );
    for dir in ctx.templates()?.dirs() {
        println!("  views      {}", dir.display());
    }
    println!("  assets     {}", ctx.config().assets_dir(ctx.path()?).display());
    println!("  controllers {}", ctx.controller_registry().names().join(", "));
    println!("  models     {}", ctx.model_registry().names().join(", "));
    Ok(())
}

fn serve_project(folder: PathBuf, port: u16, workers: Option<usize>) -> Result<(), BaldError> {
    let root = fs::canonicalize(&folder)?;
    let config = ConfigSource::Default.load(&root)?;
    bald::logging::init_logging(&config.logging)?;

    let name = project_name(&root);
    let factory: AppFactory = Arc::new(move || build_app(&root, &name, &config));

    let mut options = ServeOptions {
        port,
        ..ServeOptions::default()
    };
    if let Some(workers) = workers {
        options.workers = workers;
    }
    println!(
        "{} http://127.0.0.1:{}",
        "serving".green().bold(),
        options.port
    );
    serve(factory, options)
}

/// One worker's application: a configured stack behind the router.
fn build_app(root: &Path, name: &str, config: &ProjectConfig) -> Result<App, BaldError> {
    let mut stack = ContextStack::new();
    let ctx = Configure::new(name)
        .root(root)
        .config_object(config.clone())
        .apply(&mut stack)?;
    HomeController::register(ctx);

    let mut router = Router::new();
    router.mount(stack.active(), vec![Action::<HomeController>::index()?])?;
    Ok(App::new(stack, RequestLogger::new(router)))
}

fn project_name(folder: &Path) -> String {
    fs::canonicalize(folder)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "app".to_string())
}
