//! Stockroom CLI - Command-line interface for the Stockroom session subsystem
//!
//! Manages configuration, prints the role/feature table and runs scripted
//! sign-in sessions against the in-memory collaborators.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stockroom_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success, performance,
    NewProfile, Profile, Role, StockroomConfig,
};
use stockroom_session::{
    AuthService, AuthSnapshot, AuthTransition, AuthorizationGate, Feature, MemoryProfileStore,
    MemorySessionSource, StoreFault, FEATURE_TABLE,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "stockroom")]
#[command(about = "Session and profile tooling for Stockroom")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show which roles may use each feature
    Features {
        /// Only list the features visible to this role
        #[arg(long)]
        role: Option<Role>,

        /// Only list the features available while the profile store is unreachable
        #[arg(long, conflicts_with = "role")]
        degraded: bool,
    },

    /// Run a scripted sign-in against in-memory collaborators
    Simulate(SimulateArgs),
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Set a value, e.g. `profile.max_retries 5`
    Set { key: String, value: String },
    /// Print the configuration file in use and the search order
    Path,
}

#[derive(Args)]
struct SimulateArgs {
    /// Role stored on the user's profile
    #[arg(long, default_value = "staff")]
    role: Role,

    /// Email of the simulated account
    #[arg(long, default_value = "staff@example.org")]
    email: String,

    /// Start without a stored profile so one gets provisioned
    #[arg(long)]
    missing_profile: bool,

    /// Profile fetches that fail with a transient error first
    #[arg(long, default_value = "0")]
    transient_failures: usize,

    /// Profile fetches that exceed the fetch timeout first
    #[arg(long, default_value = "0")]
    timeouts: usize,

    /// Profile fetches are refused by the store
    #[arg(long)]
    permission_denied: bool,

    /// Sign out right after signing in, while the profile load is in flight
    #[arg(long)]
    sign_out_mid_load: bool,

    /// Reload the profile once the first load settles
    #[arg(long)]
    refresh: bool,

    /// Use millisecond timeouts and backoff instead of the configured ones
    #[arg(long)]
    fast: bool,
}

#[derive(Serialize)]
struct SimulationReport {
    transitions: Vec<AuthTransition>,
    snapshot: AuthSnapshot,
    gate: AuthorizationGate,
    visible_features: Vec<Feature>,
    store_gets: usize,
    store_inserts: usize,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_config(cli.config.as_deref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
        logging_config.filter_directives.clear();
    }
    init_logging(&logging_config).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Stockroom CLI v{}", env!("CARGO_PKG_VERSION"));
    match (&config_path, &cli.config) {
        (Some(path), _) => info!(path = %path.display(), "Loaded configuration"),
        (None, Some(path)) => warn!(path = %path.display(), "Configuration file not found, using defaults"),
        (None, None) => debug!("No configuration file found, using defaults"),
    }

    match cli.command {
        Commands::Config { action } => {
            handle_config(action, cli.config.as_deref(), config, config_path).await?
        }
        Commands::Features { role, degraded } => handle_features(role, degraded),
        Commands::Simulate(args) => handle_simulate(args, config).await?,
    }

    Ok(())
}

/// Configuration files tried when `--config` is not given, in order
fn config_search_paths() -> Vec<PathBuf> {
    [
        dirs::config_dir().map(|d| d.join("stockroom").join("config.toml")),
        dirs::home_dir().map(|d| d.join(".stockroom").join("config.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Where `config init` writes when no path is given
fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .map(|d| d.join("stockroom").join("config.toml"))
        .ok_or_else(|| anyhow!("Could not determine a configuration directory"))
}

/// First existing configuration file; an explicit path is never substituted
fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => config_search_paths().into_iter().find(|path| path.exists()),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<(StockroomConfig, Option<PathBuf>)> {
    match find_config(explicit) {
        Some(path) => {
            let config = StockroomConfig::from_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            Ok((config, Some(path)))
        }
        None => Ok((StockroomConfig::default(), None)),
    }
}

async fn handle_config(
    action: ConfigAction,
    explicit: Option<&Path>,
    config: StockroomConfig,
    config_path: Option<PathBuf>,
) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match explicit {
                Some(path) => path.to_path_buf(),
                None => default_config_path()?,
            };
            if path.exists() && !force {
                bail!(
                    "Configuration already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            StockroomConfig::default().save_to_file(&path)?;
            println!("Configuration initialized at: {}", path.display());
        }
        ConfigAction::Show => {
            match &config_path {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# No configuration file found, showing defaults"),
            }
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            let path = match explicit.map(Path::to_path_buf).or(config_path) {
                Some(path) => path,
                None => default_config_path()?,
            };

            let mut config = config;
            config.set_value(&key, &value)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            config.save_to_file(&path)?;
            println!("Set {} = {} in {}", key, value, path.display());
        }
        ConfigAction::Path => {
            match &config_path {
                Some(path) => println!("In use: {}", path.display()),
                None => println!("In use: none (defaults)"),
            }
            println!("Search order:");
            for path in config_search_paths() {
                let marker = if path.exists() { "found" } else { "missing" };
                println!("  {} ({})", path.display(), marker);
            }
        }
    }

    Ok(())
}

fn handle_features(role: Option<Role>, degraded: bool) {
    if degraded || role.is_some() {
        let profile = match role {
            Some(role) => Profile::from_new(
                "preview",
                NewProfile {
                    role,
                    ..NewProfile::provisioned("preview", "Preview")
                },
            ),
            None => Profile::degraded("preview"),
        };
        let gate = AuthorizationGate::new(Some(&profile));
        for feature in gate.visible_features() {
            println!("{}", feature);
        }
        return;
    }

    println!("{:<18} {:<22} degraded", "feature", "roles");
    for rule in FEATURE_TABLE.iter() {
        let roles = rule
            .roles
            .iter()
            .map(|role| role.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let available = if rule.available_when_degraded {
            "yes"
        } else {
            "no"
        };
        println!("{:<18} {:<22} {}", rule.feature.to_string(), roles, available);
    }
}

async fn handle_simulate(args: SimulateArgs, mut config: StockroomConfig) -> Result<()> {
    if args.fast {
        config.session.initial_session_timeout_ms = 100;
        config.profile.fetch_timeout_ms = 15;
        config.profile.base_delay_ms = 10;
        config.profile.max_delay_ms = 1_000;
        config.profile.write_timeout_ms = 100;
    }
    config.validate()?;

    log_operation_start!("simulate", role = %args.role, fast = args.fast);
    match performance::measure_async("simulate", run_simulation(&args, &config)).await {
        Ok(report) => {
            log_operation_success!("simulate", transitions = report.transitions.len());
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            log_operation_error!("simulate", e);
            Err(e)
        }
    }
}

async fn run_simulation(args: &SimulateArgs, config: &StockroomConfig) -> Result<SimulationReport> {
    let password = "simulated-password";
    let ttl = chrono::Duration::minutes(config.session.session_ttl_minutes);
    let source = Arc::new(MemorySessionSource::new().with_ttl(ttl));
    let store = Arc::new(MemoryProfileStore::new());

    let user_id = source.add_account(&args.email, password);
    if !args.missing_profile {
        store.seed(&user_id, &args.email, args.role);
    }

    let stall = Duration::from_millis(config.profile.fetch_timeout_ms + 50);
    for _ in 0..args.timeouts {
        store.fail_next_get(StoreFault::Delay(stall));
    }
    for _ in 0..args.transient_failures {
        store.fail_next_get(StoreFault::Transient);
    }
    if args.permission_denied {
        store.fail_next_get(StoreFault::Permission);
    }

    let started = Instant::now();
    let service = AuthService::new(source.clone(), store.clone(), config);
    let mut receiver = service.transitions();
    let collector = tokio::spawn(async move {
        let mut transitions = Vec::new();
        loop {
            match receiver.recv().await {
                Ok(AuthTransition::ShutDown) | Err(RecvError::Closed) => break,
                Ok(transition) => transitions.push(transition),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Simulation report is missing transitions")
                }
            }
        }
        transitions
    });

    service.initialize();
    service.wait_until_settled().await;
    service.sign_in(&args.email, password).await?;

    if args.sign_out_mid_load {
        service.sign_out().await?;
    } else {
        service.wait_until_settled().await;
    }

    if args.refresh && service.current_session().is_some() {
        let generation = service.refresh_profile()?;
        debug!(generation, "Profile refresh started");
        service.wait_until_settled().await;
    }

    let snapshot = service.snapshot();
    service.shutdown();
    let transitions = collector
        .await
        .context("Transition collector stopped unexpectedly")?;

    let gate = snapshot.gate();
    Ok(SimulationReport {
        transitions,
        visible_features: gate.visible_features(),
        gate,
        snapshot,
        store_gets: store.get_calls(),
        store_inserts: store.insert_calls(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}
