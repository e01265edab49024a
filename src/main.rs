use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use nestegg::core::{ProjectionConfig, run_projection};

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Household net-worth and retirement projection engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run a projection from a JSON config file and print the year rows
    Project {
        /// Path to a projection config JSON file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port } => {
            if let Err(e) = nestegg::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                process::exit(1);
            }
        }
        Command::Project { config } => {
            if let Err(e) = run_projection_file(&config) {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}

fn run_projection_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(path)?;
    let config: ProjectionConfig = serde_json::from_str(&raw)?;
    let results = run_projection(&config);
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
