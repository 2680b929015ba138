//! specgen CLI - runs code generators described by a generation file

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod generate;
mod logging;

#[derive(Parser)]
#[command(name = "specgen")]
#[command(version = specgen_core::VERSION)]
#[command(about = "Generate code from specifications", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate files from a generation file
    Generate {
        /// The code generation configuration file (defaults to apex.yaml)
        config: Option<String>,

        /// Home directory holding modules, definitions and formatters
        #[arg(long, env = specgen_config::HOME_ENV)]
        home: Option<PathBuf>,
    },

    /// Print the specgen version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match cli.command {
        Commands::Generate { config, home } => {
            generate::generate(&generate::GenerateOptions { config, home })?;
        }

        Commands::Version => {
            println!("specgen {}", specgen_core::VERSION);
        }
    }

    Ok(())
}
