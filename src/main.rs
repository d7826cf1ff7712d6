//! noscript speedtest - server and headless client

use clap::Parser;
use noscript_speedtest::{
    cli::{Cli, Command, RunArgs},
    client::SpeedTestClient,
    config::{display_config_summary, load_config},
    error::{AppError, Result},
    output::create_formatter,
    server::run_server,
    Config, BUILD_TIME, GIT_COMMIT, PKG_NAME, TARGET_TRIPLE, VERSION,
};
use std::error::Error;
use std::process;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Set up better panic handling
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        process::exit(1);
    }));

    let cli = Cli::parse();
    let use_color = cli.use_colors();

    if let Err(e) = run_application(cli).await {
        eprintln!("{}", e.format_for_console(use_color));

        if let Some(source) = e.source() {
            eprintln!("Caused by: {}", source);
        }

        print_error_suggestions(&e);

        process::exit(e.exit_code());
    }
}

/// Main application logic
async fn run_application(cli: Cli) -> Result<()> {
    if cli.debug {
        println!("{} v{}", PKG_NAME, VERSION);
        println!(
            "Built {} from {} for {}",
            BUILD_TIME,
            GIT_COMMIT.unwrap_or("unknown commit"),
            TARGET_TRIPLE
        );
        println!("Debug mode enabled");
        println!();
    }

    let command = cli.command.clone();
    let config = load_config(cli)?;

    if config.debug {
        println!("Configuration loaded successfully:");
        println!("{}", display_config_summary(&config));
        println!();
    }

    match command {
        Some(Command::Run(args)) => run_client(&config, args).await,
        Some(Command::Serve(_)) | None => {
            println!("Starting {} v{} on http://{}", PKG_NAME, VERSION, config.socket_addr()?);
            run_server(config).await
        }
    }
}

/// Headless run against a remote server
async fn run_client(config: &Config, args: RunArgs) -> Result<()> {
    if config.verbose {
        println!("Running speed test against {}", args.server);
    }

    let client = SpeedTestClient::new(&args.server, Duration::from_secs(args.timeout))?
        .with_download_size(args.download_size)
        .with_upload_size(args.upload_size);
    let report = client.run().await?;

    let formatter = create_formatter(config.enable_color);
    println!("{}", formatter.format_report(&report));
    Ok(())
}

/// Print helpful error suggestions
fn print_error_suggestions(error: &AppError) {
    match error {
        AppError::Config(_) | AppError::Validation(_) | AppError::Parse(_) => {
            eprintln!();
            eprintln!("Configuration help:");
            eprintln!("  - Check your .env file format");
            eprintln!("  - Run with --help to list options");
            eprintln!("  - Sizes are in bytes, timeouts in seconds");
        }
        AppError::Server(_) => {
            eprintln!();
            eprintln!("Server troubleshooting:");
            eprintln!("  - Check that the port is free (--port)");
            eprintln!("  - Ports below 1024 may need elevated privileges");
        }
        AppError::Network(_) | AppError::HttpRequest(_) | AppError::Timeout(_) => {
            eprintln!();
            eprintln!("Network troubleshooting:");
            eprintln!("  - Check that the server URL is reachable");
            eprintln!("  - Increase the timeout with --timeout");
        }
        _ => {}
    }
}
