//! runstack CLI entrypoint.
//!
//! This is the main entrypoint for the runstack command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use runstack::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use runstack::config::{
    ConfigHasher, ConfigParser, ConfigValidator, DeployConfig, find_config_file,
};
use runstack::error::{ConfigError, Result};
use runstack::graph::build_stack_graph;
use runstack::planner::plan;
use runstack::provider::HttpProvider;
use runstack::reconciler::Reconciler;
use runstack::state::{LocalStateStore, STATE_DIR, StackState, StateStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of `drift` when drift was found.
const EXIT_DRIFT: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();
    let overrides = cli.overrides.as_slice();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force).map(|()| ExitCode::SUCCESS),
        Commands::Validate => cmd_validate(config_path, overrides, &formatter),
        Commands::Plan { detailed } => {
            cmd_plan(config_path, overrides, detailed, &formatter).await
        }
        Commands::Apply {
            yes,
            rollback_on_failure,
        } => cmd_apply(config_path, overrides, yes, rollback_on_failure, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config_path, overrides, yes, &formatter).await,
        Commands::Drift => cmd_drift(config_path, overrides, &formatter).await,
        Commands::State { command } => {
            cmd_state(config_path, overrides, command, &formatter).await
        }
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new runstack project in: {}", path.display());

    let config_path = path.join("runstack.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/runstack.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();

        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# runstack")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set RUNSTACK_PROVIDER_TOKEN");
    eprintln!("  2. Edit runstack.yaml with your project and region");
    eprintln!("  3. Run 'runstack validate' to check your configuration");
    eprintln!("  4. Run 'runstack plan' to see what will change");
    eprintln!("  5. Run 'runstack apply' to converge the stack");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    overrides: &[String],
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, _) = load_config(config_path, overrides)?;
    let result = ConfigValidator::new().validate(&config)?;

    println!("{}", formatter.format_validation(&config, &result));
    Ok(ExitCode::SUCCESS)
}

/// Show the change plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    overrides: &[String],
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, config_file) = load_validated_config(config_path, overrides)?;
    let state_store = create_state_store(&config, &config_file);
    let project_id = &config.stack.project_id;

    let state = match state_store.load().await? {
        Some(state) => {
            state.check_compatible(project_id)?;
            state
        }
        None => StackState::new(project_id),
    };

    let graph = build_stack_graph(&config.stack)?;
    let changes = plan(&graph, &state, &ConfigHasher::new().hash_config(&config))?;
    println!("{}", formatter.format_plan(&changes, detailed));

    Ok(ExitCode::SUCCESS)
}

/// Apply the change plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    overrides: &[String],
    auto_approve: bool,
    rollback_on_failure: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, config_file) = load_validated_config(config_path, overrides)?;
    let state_store = create_state_store(&config, &config_file);
    let provider = create_provider(&config)?;
    let reconciler = Reconciler::new(&config, &state_store, &provider);

    let changes = reconciler.plan().await?;
    if changes.is_empty() {
        println!("{}", formatter.format_plan(&changes, false));
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        eprintln!("{}", OutputFormatter::new(OutputFormat::Text).format_plan(&changes, true));
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let report = reconciler.apply_previewed(&changes).await?;
    println!("{}", formatter.format_execution(&report));

    if report.success() {
        return Ok(ExitCode::SUCCESS);
    }

    if rollback_on_failure && report.execution.applied() > 0 {
        warn!("Apply halted, rolling back");
        let rollback = reconciler.rollback(&report).await?;
        println!("{}", formatter.format_execution(&rollback));
    }

    Ok(ExitCode::FAILURE)
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    overrides: &[String],
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, config_file) = load_validated_config(config_path, overrides)?;
    let state_store = create_state_store(&config, &config_file);
    let provider = create_provider(&config)?;
    let reconciler = Reconciler::new(&config, &state_store, &provider);

    let state = reconciler.load_state().await?;
    if state.is_empty() {
        eprintln!("No resources recorded, nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        eprintln!("The following resources will be destroyed:");
        for (id, applied) in &state.resources {
            eprintln!("  - {id} ({})", applied.remote_id);
        }
        if !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destruction cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let report = reconciler.destroy().await?;
    println!("{}", formatter.format_execution(&report));

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Check for drift.
async fn cmd_drift(
    config_path: Option<&Path>,
    overrides: &[String],
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, config_file) = load_validated_config(config_path, overrides)?;
    let state_store = create_state_store(&config, &config_file);
    let provider = create_provider(&config)?;

    let check = Reconciler::new(&config, &state_store, &provider)
        .check_drift()
        .await?;
    println!("{}", formatter.format_drift(&check));

    Ok(if check.is_converged() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_DRIFT)
    })
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    overrides: &[String],
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, config_file) = load_config(config_path, overrides)?;
    let state_store = create_state_store(&config, &config_file);

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                println!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found at {}.", state_store.state_path().display());
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match state_store.force_unlock().await? {
                    Some(lock) => eprintln!("State forcefully unlocked (was held by {}).", lock.holder),
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads configuration with `.env`, environment and `--set` overrides applied.
fn load_config(config_path: Option<&Path>, overrides: &[String]) -> Result<(DeployConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let mut config = parser.load_with_env(&config_file)?;
    ConfigParser::apply_overrides(&mut config, overrides)?;

    Ok((config, config_file))
}

/// Loads configuration and fails on the first validation error.
fn load_validated_config(
    config_path: Option<&Path>,
    overrides: &[String],
) -> Result<(DeployConfig, PathBuf)> {
    let (config, config_file) = load_config(config_path, overrides)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok((config, config_file))
}

/// Directory of the configuration file.
fn config_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Creates the local state store.
fn create_state_store(config: &DeployConfig, config_file: &Path) -> LocalStateStore {
    let base_dir = config
        .state
        .path
        .as_ref()
        .map_or_else(|| PathBuf::from(STATE_DIR), PathBuf::from);
    let base_dir = if base_dir.is_absolute() {
        base_dir
    } else {
        config_dir(config_file).join(base_dir)
    };
    LocalStateStore::with_base_dir(base_dir)
}

/// Creates the HTTP provider client.
fn create_provider(config: &DeployConfig) -> Result<HttpProvider> {
    let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
        ConfigError::validation("A provider endpoint is required", "provider.endpoint")
    })?;

    let token = ConfigParser::get_provider_token();
    if token.is_none() {
        warn!("RUNSTACK_PROVIDER_TOKEN is not set, requests will be unauthenticated");
    }

    HttpProvider::new(
        endpoint,
        &config.stack.project_id,
        token,
        config.provider.request_timeout_secs,
    )
}

/// Asks for confirmation on stderr; true if the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}
