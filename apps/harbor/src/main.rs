use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use harbor::command::parse_argv;
use harbor::config::Config;
use harbor::server::processes::PANE_ENV;
use harbor::telemetry;
use harbor::transport::send_request;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "harbor", version, about = "Terminal multiplexer server and command client")]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        help = "off, error, warn, info, debug or trace (overrides HARBOR_LOG_LEVEL)"
    )]
    log_level: Option<LevelFilter>,

    #[arg(long, global = true, help = "Append logs to a file instead of stderr (overrides HARBOR_LOG_FILE)")]
    log_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Channel to serve or connect to (harbor-<name>)")]
    channel: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until interrupted
    Serve {
        #[arg(long, help = "Start without an initial session")]
        no_session: bool,
    },
    /// Any other word is sent to a running server as a command
    #[command(external_subcommand)]
    Run(Vec<String>),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if let Some(file) = cli.log_file {
        config.log.file = Some(file);
    }
    if let Some(channel) = cli.channel {
        config.channel_override = Some(channel);
    }
    // Dropped on return, after the last event has been queued.
    let _log_guard = telemetry::init(&config.log)?;

    match cli.command {
        Command::Serve { no_session } => {
            serve(config, no_session).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(argv) => Ok(exit_code(run_command(&config, &argv).await)),
    }
}

/// Exit codes outside `0..=255` report a plain failure.
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[cfg(unix)]
async fn serve(config: Config, no_session: bool) -> Result<()> {
    use harbor::server::{Server, ServerOptions};

    let server = Server::bind(&config).await?;
    println!("{}", server.channel());
    server
        .run(ServerOptions {
            initial_session: !no_session,
        })
        .await
}

#[cfg(not(unix))]
async fn serve(_config: Config, _no_session: bool) -> Result<()> {
    anyhow::bail!("harbor serve needs Unix domain sockets")
}

async fn run_command(config: &Config, argv: &[String]) -> i32 {
    let mut request = match parse_argv(argv) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };
    if let Ok(pane) = std::env::var(PANE_ENV) {
        request.caller_pane = pane;
    }

    match send_request(&config.channel_paths().request, &request, config.io_timeout).await {
        Ok(response) => {
            print!("{}", response.stdout);
            eprint!("{}", response.stderr);
            response.exit_code
        }
        Err(err) => {
            eprintln!("harbor: {err}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_codes_map_to_process_exit_codes() {
        assert_eq!(exit_code(0), ExitCode::SUCCESS);
        assert_eq!(exit_code(3), ExitCode::from(3));
        assert_eq!(exit_code(-1), ExitCode::FAILURE);
        assert_eq!(exit_code(256), ExitCode::FAILURE);
    }
}
