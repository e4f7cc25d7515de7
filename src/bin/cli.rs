//! devhub CLI
//!
//! Command-line client for a running devhub:
//! - List devices and inspect their live state
//! - Read data history
//! - Read and replace device configuration
//! - Generate a config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devhub-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and configure devices through a devhub server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8080", global = true)]
    pub api_url: String,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show server status
    Status,

    /// List known devices
    Devices,

    /// Show one device and its live state
    Show {
        /// Device id, e.g. AA:BB:CC:DD:EE:FF
        id: String,
    },

    /// Show data history (all devices when no id is given)
    Data {
        /// Device id
        id: Option<String>,
    },

    /// Read or replace a device configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the current configuration
    Get { id: String },

    /// Replace the configuration and push it to the device
    Set {
        id: String,
        /// Configuration document, or @path to read it from a file
        document: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let response = client.get(format!("{}/health", cli.api_url)).send().await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let health: serde_json::Value = resp.json().await?;

                    println!("devhub v{}", health["version"].as_str().unwrap_or("?"));
                    println!();
                    println!("Status: {}", health["status"].as_str().unwrap_or("unknown"));
                    println!("Store: {}", health["store"].as_str().unwrap_or("unknown"));
                    println!(
                        "Connected devices: {}",
                        health["connected_devices"].as_u64().unwrap_or(0)
                    );
                    println!(
                        "Observed devices: {}",
                        health["observed_devices"].as_u64().unwrap_or(0)
                    );

                    if let Some(uptime) = health["uptime_seconds"].as_u64() {
                        println!();
                        println!("Uptime: {}", format_duration(uptime));
                    }
                }
                Ok(resp) => {
                    eprintln!("API returned error: {}", resp.status());
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Cannot connect to devhub at {}", cli.api_url);
                    eprintln!("Error: {}", e);
                    eprintln!();
                    eprintln!("Make sure the server is running:");
                    eprintln!("  cargo run --bin devhub");
                    std::process::exit(1);
                }
            }
        }

        Commands::Devices => {
            let devices = get_json(&client, &format!("{}/api/v1/identities", cli.api_url)).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                let devices = devices.as_array().cloned().unwrap_or_default();
                if devices.is_empty() {
                    println!("No devices have bootstrapped yet.");
                } else {
                    println!("{:<20} {:<10} {}", "ID", "Type", "Name");
                    println!("{}", "-".repeat(50));
                    for device in devices {
                        println!(
                            "{:<20} {:<10} {}",
                            device["dev_id"].as_str().unwrap_or("-"),
                            device["type"].as_str().unwrap_or("-"),
                            device["name"].as_str().unwrap_or("-"),
                        );
                    }
                }
            }
        }

        Commands::Show { id } => {
            let device = get_json(&client, &format!("{}/api/v1/devices/{}", cli.api_url, id)).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&device)?);
            } else {
                println!("{} ({})", device["dev_id"].as_str().unwrap_or("-"), device["type"].as_str().unwrap_or("-"));
                println!("  Name: {}", device["name"].as_str().unwrap_or("-"));
                println!("  Registered: {}", device["registered"].as_bool().unwrap_or(false));
                println!("  Connected: {}", device["connected"].as_bool().unwrap_or(false));
                println!("  Observers: {}", device["observers"].as_u64().unwrap_or(0));
            }
        }

        Commands::Data { id } => {
            let url = match &id {
                Some(id) => format!("{}/api/v1/devices/{}/data", cli.api_url, id),
                None => format!("{}/api/v1/devices", cli.api_url),
            };
            let points = get_json(&client, &url).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else {
                print_points(&points);
            }
        }

        Commands::Config(ConfigCommand::Get { id }) => {
            let config = get_json(&client, &format!("{}/api/v1/devices/{}/config", cli.api_url, id)).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Config(ConfigCommand::Set { id, document }) => {
            let body = match document.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)?,
                None => document,
            };
            // Fail fast on malformed JSON instead of a round trip
            serde_json::from_str::<serde_json::Value>(&body)?;

            let response = client
                .patch(format!("{}/api/v1/devices/{}/config", cli.api_url, id))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;

            if response.status().is_success() {
                let result: serde_json::Value = response.json().await?;
                println!(
                    "Configuration of {} replaced, pushed to {} listener(s)",
                    id,
                    result["listeners"].as_u64().unwrap_or(0)
                );
            } else {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                eprintln!("Update failed ({}): {}", status, text);
                std::process::exit(1);
            }
        }

        Commands::InitConfig { output } => {
            let config = devhub::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

async fn get_json(
    client: &reqwest::Client,
    url: &str,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        eprintln!("Request failed ({}): {}", status, text);
        std::process::exit(1);
    }

    Ok(response.json().await?)
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

fn print_points(data: &serde_json::Value) {
    let points = match data.as_array() {
        Some(p) if !p.is_empty() => p,
        _ => {
            println!("No data");
            return;
        }
    };

    println!("{:<20} {:<20} {}", "Time", "Device", "Data");
    println!("{}", "-".repeat(70));

    for point in points {
        let ts = point["time"].as_i64().unwrap_or(0);
        let time = chrono::DateTime::from_timestamp_millis(ts)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<20} {:<20} {}",
            time,
            point["dev_id"].as_str().unwrap_or("-"),
            point["data"]
        );
    }
}
