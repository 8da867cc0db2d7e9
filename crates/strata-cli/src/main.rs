mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_STORE_ERROR, EXIT_VALIDATION_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use strata_core::{AgentConfig, Engine};

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    version,
    about = "Template and snapshot distribution for ZFS-backed LXC hosts"
)]
struct Cli {
    /// Agent config file (default: $STRATA_CONFIG, then /etc/strata/agent.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install a template and every missing ancestor.
    Import {
        /// `name`, `name@owner`, `name@owner:version` or `id:<id>`; a file path with --local.
        template: String,
        /// Install from a local archive without integrity verification.
        #[arg(long, default_value_t = false)]
        local: bool,
    },
    /// Package a container as a template and upload it.
    Export {
        /// Container to export.
        container: String,
        /// Template name (defaults to the container name).
        #[arg(long)]
        name: Option<String>,
        /// Template version, X.Y.Z (defaults to the parent's version).
        #[arg(long = "template-version")]
        version: Option<String>,
        /// Preferred size: tiny, small, medium, large or huge.
        #[arg(long)]
        size: Option<String>,
        /// CDN token; decides the template owner.
        #[arg(long)]
        token: Option<String>,
        /// Keep the archive in the cache instead of uploading it.
        #[arg(long, default_value_t = false)]
        local: bool,
    },
    /// Manage container partition snapshots.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommand,
    },
    /// Create a container from an installed template.
    Clone {
        /// Template key, `name:owner:version`.
        template: String,
        /// New container name.
        name: String,
    },
    /// Destroy a container, or a template with --template.
    Destroy {
        name: String,
        /// `name` is a template key.
        #[arg(long, default_value_t = false)]
        template: bool,
    },
    /// Keep desired-running containers running.
    Supervise {
        /// Run a single reconciliation cycle and exit.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum SnapshotCommand {
    /// Snapshot a partition (rootfs, home, var, opt, config or all).
    Create {
        container: String,
        partition: String,
        label: String,
        /// Stop a running container while the snapshot is taken.
        #[arg(long, default_value_t = false)]
        stop: bool,
    },
    /// Remove a snapshot.
    Remove {
        container: String,
        partition: String,
        label: String,
    },
    /// List snapshots of every container, one container, or one partition.
    List {
        container: Option<String>,
        #[arg(long, short)]
        partition: Option<String>,
    },
    /// Roll a partition (or all of them) back to a snapshot.
    Rollback {
        container: String,
        partition: String,
        label: String,
        /// Destroy snapshots newer than the target.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Stop a running container during the rollback.
        #[arg(long, default_value_t = false)]
        stop: bool,
    },
    /// Dump snapshot deltas of a container into a bundle archive.
    Send {
        container: String,
        /// One label (delta from the parent template) or two (delta between them).
        #[arg(required = true, num_args = 1..=2)]
        labels: Vec<String>,
        /// Directory the bundle is written to.
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
    /// Load a snapshot bundle into a container.
    Receive {
        container: String,
        /// Bundle path, or a file name in the cache directory.
        source: String,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => load_engine(cli.config.as_ref())
            .and_then(|engine| dispatch(&engine, command, cli.json)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("validation error:") {
                EXIT_VALIDATION_ERROR
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn load_engine(explicit: Option<&PathBuf>) -> Result<Engine, String> {
    let path = AgentConfig::locate(explicit.map(PathBuf::as_path));
    let config = AgentConfig::load(&path).map_err(|e| e.to_string())?;
    Engine::new(&config).map_err(|e| e.to_string())
}

fn dispatch(engine: &Engine, command: Commands, json: bool) -> Result<u8, String> {
    match command {
        Commands::Import { template, local } => {
            commands::import::run(engine, &template, local, json)
        }
        Commands::Export {
            container,
            name,
            version,
            size,
            token,
            local,
        } => commands::export::run(
            engine,
            &container,
            strata_core::ExportOptions {
                new_name: name,
                version,
                pref_size: size,
                token,
                local,
            },
            json,
        ),
        Commands::Snapshot { action } => match action {
            SnapshotCommand::Create {
                container,
                partition,
                label,
                stop,
            } => commands::snapshot::create(engine, &container, &partition, &label, stop, json),
            SnapshotCommand::Remove {
                container,
                partition,
                label,
            } => commands::snapshot::remove(engine, &container, &partition, &label, json),
            SnapshotCommand::List {
                container,
                partition,
            } => commands::snapshot::list(engine, container.as_deref(), partition.as_deref(), json),
            SnapshotCommand::Rollback {
                container,
                partition,
                label,
                force,
                stop,
            } => commands::snapshot::rollback(
                engine, &container, &partition, &label, force, stop, json,
            ),
            SnapshotCommand::Send {
                container,
                labels,
                dest,
            } => commands::bundle::send(engine, &container, &labels, &dest, json),
            SnapshotCommand::Receive { container, source } => {
                commands::bundle::receive(engine, &container, &source, json)
            }
        },
        Commands::Clone { template, name } => commands::clone::run(engine, &template, &name, json),
        Commands::Destroy { name, template } => {
            commands::destroy::run(engine, &name, template, json)
        }
        Commands::Supervise { once } => commands::supervise::run(engine, once, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}
