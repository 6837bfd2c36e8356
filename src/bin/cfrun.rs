//! Load driver for the runtime.
//!
//! Fires concurrent requests at one application, each bumping a hit counter
//! in the application scope and, with sessions on, in the client's session.
//!
//! Usage:
//!   cfrun --app shop --sessions --threads 8 --requests 100 --clients 4

use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Barrier};
use std::thread;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cfml_runtime::runner::config::{ApplicationSettings, RuntimeConfig};
use cfml_runtime::runner::ds::error::Result;
use cfml_runtime::runner::ds::key::Key;
use cfml_runtime::runner::ds::value::Value;
use cfml_runtime::runner::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "cfrun", version, about = "Drive concurrent requests through the runtime")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application name (overrides the config file)
    #[arg(short, long)]
    app: Option<String>,

    /// Enable session management
    #[arg(short, long)]
    sessions: bool,

    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Requests per thread
    #[arg(short, long, default_value_t = 25)]
    requests: usize,

    /// Distinct session ids to spread requests over
    #[arg(long, default_value_t = 2)]
    clients: usize,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("cfrun: {}", e);
                process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };
    if let Some(app) = &cli.app {
        config.application.name = app.clone();
    }
    if cli.sessions {
        config.application.session_management = true;
    }
    if !config.application.has_application() {
        config.application.name = "cfrun".to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = config.application.clone();
    let runtime = Arc::new(Runtime::new(config));
    let barrier = Arc::new(Barrier::new(cli.threads.max(1)));

    let handles: Vec<_> = (0..cli.threads.max(1))
        .map(|worker| {
            let runtime = runtime.clone();
            let barrier = barrier.clone();
            let settings = settings.clone();
            let requests = cli.requests;
            let clients = cli.clients.max(1);
            thread::spawn(move || {
                barrier.wait();
                let mut failed = 0usize;
                for n in 0..requests {
                    let client = (worker + n) % clients;
                    if let Err(e) = run_request(&runtime, &settings, client) {
                        error!(worker, error = %e, "request failed");
                        failed += 1;
                    }
                }
                failed
            })
        })
        .collect();

    let mut failed = 0;
    for handle in handles {
        failed += handle.join().unwrap_or(1);
    }

    print_summary(&runtime, &settings);
    let reports = runtime.shutdown();
    for report in &reports {
        println!(
            "shut down [{}]: {} session(s) closed, {} failure(s)",
            report.application,
            report.sessions_closed,
            report.failures.len()
        );
    }
    if failed > 0 {
        eprintln!("cfrun: {} request(s) failed", failed);
        process::exit(1);
    }
}

fn bump(current: Option<&Value>) -> Value {
    Value::Integer(current.and_then(Value::as_i64).unwrap_or(0) + 1)
}

fn run_request(runtime: &Runtime, settings: &ApplicationSettings, client: usize) -> Result<()> {
    let server = runtime.server_context();
    let request = server.request();
    request.push_template("/index.cfm");
    request.update_settings(settings.clone())?;
    request.set_session_id(Key::of(format!("client-{}", client)))?;

    let application = request.get_scope(&Key::of("application"))?;
    application.update("hits", bump)?;
    if settings.session_management {
        let session = request.get_scope(&Key::of("session"))?;
        session.update("hits", bump)?;
    }
    Ok(())
}

fn print_summary(runtime: &Runtime, settings: &ApplicationSettings) {
    let name = Key::of(settings.name.as_str());
    let app = match runtime.registry().get(&name) {
        Some(app) => app,
        None => {
            println!("no application registered");
            return;
        }
    };
    let hits = app.scope().get_or(&Key::of("hits"), Value::Integer(0));
    info!(application = %name, "run complete");
    println!("application [{}]: {} hit(s)", app.name(), hits);
    for id in app.session_ids() {
        if let Some(session) = app.session(&id) {
            let hits = session.scope().get_or(&Key::of("hits"), Value::Integer(0));
            println!("  session [{}]: {} hit(s)", id, hits);
        }
    }
}
