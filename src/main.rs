use clap::{Parser, Subcommand};
use crdash::config::{load_config, Overrides};
use crdash::{CrdError, Database, Params, QueryOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Command-line access to the Central Resource Dashboard database layer.
#[derive(Debug, Parser)]
#[command(name = "crdash", version, about)]
struct Cli {
    /// TOML file with explicit overrides (default: <config dir>/crdash/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print connection status as JSON
    Status {
        /// Open the connection before reporting
        #[arg(long)]
        connect: bool,
    },
    /// Print the resolved connection descriptor
    Dsn,
    /// Run a statement; rows are printed as JSON
    Query {
        sql: String,
        /// Named parameter, as name=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Check whether a row with column = value exists
    Exists {
        table: String,
        column: String,
        value: String,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_overrides(explicit: Option<PathBuf>) -> crdash::Result<Overrides> {
    let path = explicit.or_else(|| {
        dirs::config_dir()
            .map(|dir| dir.join("crdash").join("config.toml"))
            .filter(|path| path.exists())
    });
    match path {
        Some(path) => {
            debug!("Loading overrides from {}", path.display());
            load_config(&path)
        }
        None => Ok(Overrides::default()),
    }
}

fn run(cli: Cli) -> crdash::Result<()> {
    let db = Database::new(load_overrides(cli.config)?);
    info!("Environment: {}", db.environment());

    match cli.command {
        Command::Status { connect } => {
            if connect {
                // failure is already logged and shows up as connected: false
                let _ = db.connection();
            }
            println!("{}", serde_json::to_string_pretty(&db.status())?);
        }
        Command::Dsn => println!("{}", db.config()?.dsn()),
        Command::Query { sql, params } => {
            let params: Params = params.into_iter().collect();
            match db.execute_query(&sql, &params)? {
                QueryOutcome::Rows(rows) => println!("{}", serde_json::to_string_pretty(&rows)?),
                QueryOutcome::Done => {
                    println!("OK");
                    if let Some(id) = db.last_insert_id()? {
                        println!("last insert id: {}", id);
                    }
                }
            }
        }
        Command::Exists { table, column, value } => {
            println!("{}", db.try_record_exists(&table, &column, value)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ CrdError::Unavailable(_)) => {
            eprintln!("{}", err);
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
