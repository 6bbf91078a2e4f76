mod cli;
mod config;
mod error;
mod listener;
mod server;

use std::io::BufRead;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hmcgate_config::Config;
use hmcgate_core::{ConnectionState, Gateway, with_deadline};

use crate::cli::{Cli, Command, ConfigCommand, GlobalOpts, LogFormat};
use crate::error::CliError;
use crate::listener::GateListener;

const LOGON_DEADLINE: Duration = Duration::from_secs(15);
const REPORT_DEADLINE: Duration = Duration::from_secs(60);
const RELEASE_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, configured: &str, format: LogFormat) {
    let level = match verbosity {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let cfg = config::load(&cli.global)?;
    init_tracing(cli.global.verbose, &cfg.log_level, cli.global.log_format);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg).await,
        Command::Report => report(cfg).await,
        Command::Config(args) => config_command(&args.command, &cli.global, &cfg),
    }
}

async fn serve(cfg: Config) -> Result<(), CliError> {
    let addr = cfg.listen_addr()?;
    let tls = cfg
        .server_tls()?
        .map(|files| listener::tls_acceptor(&files))
        .transpose()?;
    let gateway = Gateway::new(cfg.to_gateway_config()?)?;
    let app = server::router(gateway.clone(), cfg.basic_auth());

    let shutdown = CancellationToken::new();
    let listener = GateListener::bind(addr, tls, shutdown.clone())
        .await
        .map_err(|source| CliError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    tokio::spawn(log_connection_changes(gateway.watch_connection()));
    if let Err(e) = with_deadline(LOGON_DEADLINE, gateway.connect()).await {
        error!(error = %e, "no connection to console at startup");
    }

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let served = server::serve(listener, app, shutdown).await;
    if let Err(ref e) = served {
        error!(error = %e, "server ended");
    }

    match with_deadline(RELEASE_DEADLINE, gateway.shutdown()).await {
        Ok(()) => info!("shutdown complete"),
        Err(e) => warn!(error = %e, "console session not released cleanly"),
    }
    served
}

async fn report(cfg: Config) -> Result<(), CliError> {
    let gateway = Gateway::new(cfg.to_gateway_config()?)?;

    let result = with_deadline(REPORT_DEADLINE, async {
        gateway.connect().await?;
        gateway.quick_status().await
    })
    .await;
    if let Err(e) = with_deadline(RELEASE_DEADLINE, gateway.shutdown()).await {
        warn!(error = %e, "console session not released cleanly");
    }

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn config_command(command: &ConfigCommand, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    match command {
        ConfigCommand::Show => print!("{}", cfg.render_redacted()?),
        ConfigCommand::Path => println!("{}", config::display_path(global)),
        ConfigCommand::SetPassword => {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            let password = line.trim_end_matches(['\r', '\n']);
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "empty input on stdin".into(),
                });
            }
            hmcgate_config::store_password(cfg, &SecretString::from(password.to_owned()))?;
            eprintln!("Password stored for console '{}'", cfg.console_label());
        }
    }
    Ok(())
}

async fn log_connection_changes<S>(mut states: watch::Receiver<S>)
where
    S: Copy + Into<ConnectionState>,
{
    while states.changed().await.is_ok() {
        let state: ConnectionState = (*states.borrow_and_update()).into();
        info!(%state, "console connection");
    }
}

/// Resolve on SIGINT or SIGTERM and cancel `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    warn!("shutdown signal received, stopping");
    token.cancel();
}
