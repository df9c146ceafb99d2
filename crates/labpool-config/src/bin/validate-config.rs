//! Config validation CLI tool
//!
//! Validates a labpoold configuration file and reports any errors.

use labpool_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a labpoold configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!(
            "Error: Configuration file not found: {}",
            config_path.display()
        );
        return ExitCode::from(1);
    }

    match labpool_config::load_config(&config_path) {
        Ok(pool) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", labpool_config::CURRENT_CONFIG_VERSION);
            println!("  Resources: {}", pool.resources.len());
            println!(
                "  Default session: {}m, extension: {}m, scan every {}s",
                pool.defaults.session_minutes,
                pool.defaults.extension_minutes,
                pool.service.scan_interval.as_secs()
            );

            if !pool.resources.is_empty() {
                println!();
                println!("Resources:");
                for resource in &pool.resources {
                    let flag = if resource.maintenance {
                        " (maintenance)"
                    } else {
                        ""
                    };
                    println!(
                        "  - {} [{}]: {} @ {}{}",
                        resource.id.as_str(),
                        resource.kind.as_str(),
                        resource.name,
                        resource.address,
                        flag
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                labpool_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                labpool_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                labpool_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                labpool_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        labpool_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
