mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_INVALID, EXIT_STORE_ERROR};
use satchel_core::{Engine, SatchelConfig};
use satchel_store::FsStorage;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "satchel",
    version,
    about = "Validate, sanitize and install distributable content packages"
)]
struct Cli {
    /// Path to the Satchel store directory (overrides the config file).
    #[arg(long, global = true)]
    store: Option<String>,

    /// Path to a config file (default: ~/.config/satchel/config.toml).
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
    /// Validate an extracted package directory without installing it.
    Validate {
        /// Package directory (holding h5p.json).
        dir: PathBuf,
    },
    /// Validate a package, then store its libraries and sanitized content.
    Install {
        /// Package directory (holding h5p.json).
        dir: PathBuf,
    },
    /// Sanitize a parameters file against an installed library's semantics.
    CheckContent {
        /// Path to a content.json file.
        file: PathBuf,
        /// Library to validate against, e.g. "H5P.Text 1.1".
        #[arg(long)]
        library: String,
    },
    /// Show every library an installed library depends on.
    Deps {
        /// Library, e.g. "H5P.Text 1.1" or "H5P.Text-1.1".
        library: String,
    },
    /// List installed libraries.
    Libraries,
    /// Delete a content item and its usage rows.
    DeleteContent {
        /// Content id.
        id: String,
    },
    /// Duplicate a content item with its files and usage rows.
    CopyContent {
        /// Content id.
        id: String,
    },
    /// Verify store integrity.
    VerifyStore,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
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
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SATCHEL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let json = cli.json;
    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => open_engine(cli.config.as_deref(), cli.store.as_deref())
            .and_then(|engine| dispatch(&engine, command, json)),
    };
    finish(result)
}

fn dispatch(engine: &Engine<FsStorage>, command: Commands, json: bool) -> Result<u8, String> {
    match command {
        Commands::Validate { dir } => commands::validate::run(engine, &dir, json),
        Commands::Install { dir } => commands::install::run(engine, &dir, json),
        Commands::CheckContent { file, library } => {
            commands::check_content::run(engine, &file, &library, json)
        }
        Commands::Deps { library } => commands::deps::run(engine, &library, json),
        Commands::Libraries => commands::libraries::run(engine, json),
        Commands::DeleteContent { id } => commands::delete_content::run(engine, &id, json),
        Commands::CopyContent { id } => commands::copy_content::run(engine, &id, json),
        Commands::VerifyStore => commands::verify_store::run(engine, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn open_engine(
    config_path: Option<&Path>,
    store: Option<&str>,
) -> Result<Engine<FsStorage>, String> {
    let mut config = match config_path {
        Some(path) => SatchelConfig::load(path),
        None => SatchelConfig::load_default(),
    }
    .map_err(|e| e.to_string())?;
    if let Some(store) = store {
        config = config.with_store(expand_tilde(store));
    }
    tracing::debug!("using store {}", config.store.display());
    Engine::open(config).map_err(|e| e.to_string())
}

fn finish(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:") || msg.starts_with("invalid content:")
            {
                EXIT_INVALID
            } else if msg.starts_with("store error:") || msg.starts_with("store is locked") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
