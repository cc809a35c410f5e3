//! linewise client binary.
//!
//! `chat` relays stdin lines to an echo server and prints each reply.
//! `compute` sends two integers (from the command line, or prompted for on
//! stdin) and prints the two squares the server returns.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::error;
use tracing_subscriber::EnvFilter;

use linewise::client::{read_message, read_operands, Client};
use linewise::config::{Endpoint, DEFAULT_PORT};
use linewise::error::ClientError;

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "linewise-client")]
#[command(version = "0.1.0")]
#[command(about = "Client for the linewise line protocol server", long_about = None)]
struct ClientArgs {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connect/read/write deadline in seconds (0 disables)
    #[arg(short = 't', long, default_value_t = 30)]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send stdin lines to an echo server, printing each reply
    Chat,
    /// Ask a compute server to square two integers
    Compute {
        /// The two integers; read from stdin when omitted
        #[arg(num_args = 0..=2, allow_negative_numbers = true)]
        operands: Vec<i64>,

        /// Line sent before the operands (server needs `skip_preamble`)
        #[arg(short, long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Client failed");
            eprintln!("linewise-client: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ClientArgs) -> Result<(), ClientError> {
    let endpoint = Endpoint::new(args.host, args.port);
    let io_timeout = (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs));

    match args.command {
        Command::Chat => {
            let mut client = Client::connect(&endpoint, io_timeout).await?;
            let stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            client.chat(stdin, &mut stdout).await?;
            client.close().await
        }
        Command::Compute {
            operands,
            mut message,
        } => {
            let (first, second) = match operands.as_slice() {
                [first, second] => (*first, *second),
                [] => {
                    let mut stdin = BufReader::new(tokio::io::stdin());
                    if message.is_none() {
                        prompt("Enter your message (blank for none): ")?;
                        message = read_message(&mut stdin).await?;
                    }
                    prompt("Enter two integers: ")?;
                    read_operands(&mut stdin).await?
                }
                _ => {
                    return Err(ClientError::InvalidInput(
                        "expected two integers".to_string(),
                    ))
                }
            };

            let client = Client::connect(&endpoint, io_timeout).await?;
            for reply in client.compute(message.as_deref(), first, second).await? {
                println!("{reply}");
            }
            Ok(())
        }
    }
}

fn prompt(text: &str) -> std::io::Result<()> {
    print!("{text}");
    std::io::stdout().flush()
}
