//! volcli - REST client for the volume orchestrator
//!
//! Exit codes: 0 on success, 1 on operational error, 2 on usage error
//! (clap reports usage errors itself).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

// =============================================================================
// CLI Definition
// =============================================================================

/// Manage backends, volumes, storage classes, and nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Orchestrator API endpoint
    #[arg(long, env = "ORCHESTRATOR_URL", default_value = "http://127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show one or all objects of a kind
    Get {
        #[command(subcommand)]
        kind: GetKind,
    },
    /// Create an object from a config file or flags
    Create {
        #[command(subcommand)]
        kind: CreateKind,
    },
    /// Update a backend from a config file
    Update {
        #[command(subcommand)]
        kind: UpdateKind,
    },
    /// Delete an object by name
    Delete {
        #[command(subcommand)]
        kind: DeleteKind,
    },
    /// Show client and server versions
    Version,
}

#[derive(Subcommand, Debug)]
enum GetKind {
    Backend { name: Option<String> },
    Volume { name: Option<String> },
    Storageclass { name: Option<String> },
    Node { name: Option<String> },
}

#[derive(Subcommand, Debug)]
enum CreateKind {
    /// Register a backend from a driver config file
    Backend {
        /// Path to the JSON driver config
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Provision a volume
    Volume {
        name: String,
        /// Size in bytes
        #[arg(long)]
        size: String,
        #[arg(long = "storage-class")]
        storage_class: String,
        /// file, block, or any
        #[arg(long, default_value = "any")]
        protocol: String,
    },
    /// Register a storage class from a config file
    Storageclass {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum UpdateKind {
    Backend {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum DeleteKind {
    Backend { name: String },
    Volume { name: String },
    Storageclass { name: String },
    Node { name: String },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let client = ApiClient::new(cli.server);
    match cli.command {
        Command::Get { kind } => match kind {
            GetKind::Backend { name } => client.get("backends", name).await,
            GetKind::Volume { name } => client.get("volumes", name).await,
            GetKind::Storageclass { name } => client.get("storageclasses", name).await,
            GetKind::Node { name } => client.get("nodes", name).await,
        },
        Command::Create { kind } => match kind {
            CreateKind::Backend { file } => {
                let body = read_config(&file)?;
                client.post_raw("backends", body).await
            }
            CreateKind::Volume {
                name,
                size,
                storage_class,
                protocol,
            } => {
                let body = serde_json::json!({
                    "name": name,
                    "size": size,
                    "storageClass": storage_class,
                    "protocol": protocol,
                });
                client.post_json("volumes", &body).await
            }
            CreateKind::Storageclass { file } => {
                let body = read_config(&file)?;
                let value: serde_json::Value =
                    serde_json::from_str(&body).map_err(|e| format!("invalid config: {}", e))?;
                client.post_json("storageclasses", &value).await
            }
        },
        Command::Update { kind } => match kind {
            // Backend creation is create-or-update on the server side.
            UpdateKind::Backend { file } => {
                let body = read_config(&file)?;
                client.post_raw("backends", body).await
            }
        },
        Command::Delete { kind } => match kind {
            DeleteKind::Backend { name } => client.delete("backends", &name).await,
            DeleteKind::Volume { name } => client.delete("volumes", &name).await,
            DeleteKind::Storageclass { name } => client.delete("storageclasses", &name).await,
            DeleteKind::Node { name } => client.delete("nodes", &name).await,
        },
        Command::Version => {
            println!("volcli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn read_config(path: &PathBuf) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("could not read {}: {}", path.display(), e))
}

// =============================================================================
// API Client
// =============================================================================

struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    fn new(base: String) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, kind: &str, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("{}/v1/{}/{}", self.base, kind, name),
            None => format!("{}/v1/{}", self.base, kind),
        }
    }

    async fn get(&self, kind: &str, name: Option<String>) -> Result<(), String> {
        let response = self
            .http
            .get(self.url(kind, name.as_deref()))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::render(response).await
    }

    async fn post_raw(&self, kind: &str, body: String) -> Result<(), String> {
        let response = self
            .http
            .post(self.url(kind, None))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::render(response).await
    }

    async fn post_json(&self, kind: &str, body: &serde_json::Value) -> Result<(), String> {
        let response = self
            .http
            .post(self.url(kind, None))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::render(response).await
    }

    async fn delete(&self, kind: &str, name: &str) -> Result<(), String> {
        let response = self
            .http
            .delete(self.url(kind, Some(name)))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::render(response).await
    }

    /// Pretty-print the response body; non-2xx is an operational error.
    async fn render(response: reqwest::Response) -> Result<(), String> {
        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(body);
            return Err(format!("{}: {}", status, message));
        }
        if !body.is_empty() {
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(value) => println!(
                    "{}",
                    serde_json::to_string_pretty(&value).unwrap_or(body)
                ),
                Err(_) => println!("{}", body),
            }
        }
        Ok(())
    }
}
