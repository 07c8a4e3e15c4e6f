//! Lumo - server-side component rendering with browser hydration.

mod assets;
mod bundler;
mod cli;
mod compiler;
mod config;
mod controller;
mod embed;
mod error;
mod logger;
mod render;
mod resolver;
mod router;
mod runtime;
mod utils;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::{AppConfig, init_config};

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    cli::serve::setup_shutdown_handler()?;

    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let config = init_config(AppConfig::load(cli)?);

    match &cli.command {
        Commands::Init { name, dry } => cli::init::new_project(&config, name.is_some(), *dry),
        Commands::Serve { .. } => cli::serve::run(&config),
        Commands::Routes => cli::routes::print_routes(&config),
    }
}
