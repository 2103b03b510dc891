use anyhow::Result;
use clap::{Parser, Subcommand};
use common::JsonLinesFrames;
use std::path::PathBuf;
use tracing::info;

mod worker;

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Procesamiento de un archivo dentro de un job del cluster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cuenta los frames de física de un archivo y escribe {"size": N}
    Count {
        #[arg(short = 'i', long = "input", value_name = "ENTRADA")]
        input: PathBuf,

        #[arg(short = 'o', long = "output", value_name = "SALIDA")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worker=debug,common=debug".into()),
        )
        .init();

    // Nombre de host (solo para info: en qué nodo del cluster corrió)
    let hostname_str = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let cli = Cli::parse();
    match cli.command {
        Commands::Count { input, output } => {
            info!("worker en {} contando {}", hostname_str, input.display());
            worker::count(&JsonLinesFrames, &input, &output)?;
        }
    }

    Ok(())
}
