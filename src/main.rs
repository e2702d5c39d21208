//! Command-line front end for the resilient API client.
//!
//! Issues one request through the full client stack (retry, refresh,
//! request IDs) and prints the JSON payload.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use resilient_client::auth::Credential;
use resilient_client::config::{load_config, ClientConfig};
use resilient_client::observability::{logging, metrics};
use resilient_client::{ApiRequest, RetryMode, ResilientClient};

#[derive(Parser)]
#[command(name = "resilient-client")]
#[command(about = "Call a REST API through the resilient client", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `api.base_url`
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a path
    Get {
        path: String,
        /// Query parameters as key=value
        #[arg(short, long)]
        query: Vec<String>,
    },
    /// POST a JSON body
    Post {
        path: String,
        body: String,
        /// Retry on transient failure
        #[arg(long)]
        retry: bool,
    },
    /// PUT a JSON body
    Put {
        path: String,
        body: String,
        #[arg(long)]
        retry: bool,
    },
    /// DELETE a path
    Delete { path: String },
    /// Store a credential pair in `auth.token_file`
    Login {
        access_token: String,
        refresh_token: String,
    },
    /// Forget the stored credential
    Logout,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = cli.url {
        config.api.base_url = url;
    }

    logging::init_logging(&config.observability);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::debug!(base_url = %config.api.base_url, "Configuration loaded");
    let login_storage = require_token_file(&config);
    let client = ResilientClient::new(config)?;

    let request = match cli.command {
        Commands::Get { path, query } => {
            let mut request = ApiRequest::get(path);
            for pair in query {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("query parameter '{}' is not key=value", pair))?;
                request = request.query(key, value);
            }
            request
        }
        Commands::Post { path, body, retry } => {
            ApiRequest::post(path, serde_json::from_str(&body)?).retry(retry_mode(retry))
        }
        Commands::Put { path, body, retry } => {
            ApiRequest::put(path, serde_json::from_str(&body)?).retry(retry_mode(retry))
        }
        Commands::Delete { path } => ApiRequest::delete(path),
        Commands::Login {
            access_token,
            refresh_token,
        } => {
            login_storage?;
            client.login(Credential::new(access_token, refresh_token));
            println!("Credential stored");
            return Ok(());
        }
        Commands::Logout => {
            client.logout();
            println!("Logged out");
            return Ok(());
        }
    };

    let payload: Value = client.execute(request).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);

    client.shutdown();
    Ok(())
}

fn retry_mode(retry: bool) -> RetryMode {
    if retry {
        RetryMode::Always
    } else {
        RetryMode::Auto
    }
}

/// A credential stored in memory is lost when this process exits.
fn require_token_file(config: &ClientConfig) -> Result<(), &'static str> {
    match config.auth.token_file {
        Some(_) => Ok(()),
        None => Err("login requires auth.token_file in the config file"),
    }
}
