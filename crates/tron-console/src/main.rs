//! Command console for the tron hub.
//!
//! Connects, logs in with the password stored in the OS keyring, follows
//! keyword patterns and sends each stdin line as a command.
//!
//!   tron-console --host hub.apo.example --user craig 'tcc.*' boss.exposureState

mod config;
mod console;
mod secrets;

use clap::Parser;
use config::ConsoleConfig;
use console::{OutputFormat, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tron_client::{ClientIdentity, Connection, SecretStore};

#[derive(Debug, Parser)]
#[command(name = "tron-console", version, about = "Command console for the tron hub")]
struct Args {
    /// Hub host (overrides the config file).
    #[arg(long, env = "TRON_HOST")]
    host: Option<String>,

    /// Hub port (overrides the config file).
    #[arg(long, env = "TRON_PORT")]
    port: Option<u16>,

    /// Hub user name.
    #[arg(long, short, env = "TRON_USER")]
    user: String,

    /// Program name to log in under.
    #[arg(long, env = "TRON_PROGRAM", default_value = "APO")]
    program: String,

    /// Config file (default: platform config dir).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Read the password from this environment variable instead of the keyring.
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,

    /// Print keyword updates as JSON lines.
    #[arg(long)]
    json: bool,

    /// Keyword patterns to follow: `*`, `actor.*` or `actor.key`.
    #[arg(default_value = "*")]
    patterns: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("tron_client=info".parse()?))
        .init();

    let args = Args::parse();
    let config = ConsoleConfig::load(args.config.as_deref())?;
    let host = args.host.unwrap_or(config.hub.host);
    let port = args.port.unwrap_or(config.hub.port);
    let client = config.client;

    let secrets: Arc<dyn SecretStore> = match &args.password_env {
        Some(var) => {
            let account = client.password_account(&args.user);
            let store = secrets::from_env(var, &client.secret_service, &account)
                .ok_or_else(|| anyhow::anyhow!("environment variable {var} is not set"))?;
            Arc::new(store)
        }
        None => Arc::new(secrets::KeyringSecretStore),
    };

    tracing::info!(%host, port, observatory = %client.observatory, "starting console");
    let conn = Connection::new(client, ClientIdentity::detect(env!("CARGO_PKG_VERSION")), secrets);

    let format = if args.json { OutputFormat::Json } else { OutputFormat::Plain };
    console::run(
        &conn,
        Session {
            host: &host,
            port,
            user: &args.user,
            program: &args.program,
            patterns: &args.patterns,
            format,
        },
    )
    .await
}
