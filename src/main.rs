//! STASHD - In-Memory File Cache Server
//!
//! Main entry point for the server binary.
//!
//! Loads settings from the config file named by the first CLI argument
//! (default `config.txt`), runs the server until a shutdown signal
//! completes, and prints the exit summary.

use std::panic;
use std::path::PathBuf;

use stashd::config::Settings;
use stashd::server::Server;

fn main() -> anyhow::Result<()> {
    // Set up panic hook for better error reporting
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("STASHD Fatal Error:");
        eprintln!("{}", panic_info);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "Location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
    }));

    // Initialize logging with configurable level
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("STASHD - In-Memory File Cache Server");
    log::info!("Version: {}", stashd::VERSION);

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.txt"));

    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!(
                "could not load {}: {e}; starting with defaults",
                config_path.display()
            );
            Settings::default()
        }
    };

    log::info!(
        "cache bounds: {} files, {} bytes",
        settings.max_file_count,
        settings.max_bytes
    );

    let report = Server::new(settings).run()?;

    // The exit summary goes to stdout, unconditionally.
    println!("max file count reached: {}", report.summary.max_files_reached);
    println!("max byte total reached: {}", report.summary.max_bytes_reached);
    println!("evictions: {}", report.summary.evictions);
    println!("files at exit: {}", report.summary.files_at_exit);
    println!("max simultaneous clients: {}", report.max_clients);
    println!("remaining files:");
    for path in &report.summary.remaining_paths {
        println!("  {}", String::from_utf8_lossy(path));
    }

    log::info!("shutdown complete");
    Ok(())
}
