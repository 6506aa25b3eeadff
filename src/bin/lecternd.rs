//! lecternd - Document Q&A analysis service.
//!
//! Usage:
//!   lecternd                     # Serve on the default endpoint
//!   lecternd serve --port 6000   # Serve with overrides
//!   lecternd status              # Query a running server's status
//!   lecternd presets             # List settings presets
//!   lecternd ask "question"      # Ask a running server

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lectern::config::{DEFAULT_PORT, ServerConfig};
use lectern::daemon::protocol::Request;
use lectern::daemon::server::{send_request, RpcServer};
use lectern::engine::PlaceholderFactory;
use lectern::service::QaService;

#[derive(Parser)]
#[command(name = "lecternd")]
#[command(about = "Lectern - document Q&A analysis service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground (the default command)
    Serve {
        /// TOML config file with server settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Interface to bind (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Query a running server's status
    Status {
        /// Server host to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// List the available settings presets
    Presets {
        /// Server host to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Ask a running server a question
    Ask {
        /// The question to run against the document collection
        question: String,

        /// Server host to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve {
        config: None,
        host: None,
        port: None,
    }) {
        Commands::Serve { config, host, port } => serve(config, host, port),
        Commands::Status { host, port } => client(&host, port, Request::new("get_status")),
        Commands::Presets { host, port } => client(&host, port, Request::new("get_preset_names")),
        Commands::Ask {
            question,
            host,
            port,
        } => client(
            &host,
            port,
            Request::new("ask").with_param("question", question.as_str()),
        ),
    }
}

fn serve(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    info!(
        pid = std::process::id(),
        addr = %config.bind_addr(),
        "starting lecternd"
    );
    let service = QaService::new(Box::new(PlaceholderFactory));
    let mut server = RpcServer::bind(config, service)?;
    server.install_signal_handlers()?;
    server.run()
}

fn client(host: &str, port: u16, request: Request) -> Result<()> {
    let response = send_request(&format!("{}:{}", host, port), &request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
