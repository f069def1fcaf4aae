mod cli;

use actix_web::{App, HttpServer, web};
use libcirc::server::AppState;
use libcirc::{LibraryConfig, SystemClock};
use std::sync::Arc;

const CONFIG_ENV: &str = "LIBCIRC_CONFIG";

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn load_config(path: Option<&str>) -> LibraryConfig {
    let path = path
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_ENV).ok());

    let Some(path) = path else {
        return LibraryConfig::default();
    };
    match LibraryConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> Result<(), std::io::Error> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: libcirc serve [config.json]");
        eprintln!("       libcirc <data_path> <command> [args...]");
        std::process::exit(1);
    }

    if args[1] == "serve" {
        let config = load_config(args.get(2).map(String::as_str));
        init_tracing(&config.log_level);

        let bind_addr = config.bind_addr.clone();
        let state = match AppState::open(config, Arc::new(SystemClock)) {
            Ok(state) => web::Data::new(state),
            Err(e) => {
                tracing::error!("Failed to open library: {}", e);
                std::process::exit(1);
            }
        };

        tracing::info!(addr = %bind_addr, "libcirc listening");
        HttpServer::new(move || App::new().app_data(state.clone()).configure(libcirc::server::config))
            .bind(bind_addr)?
            .run()
            .await?;
    } else {
        let config = load_config(None);
        init_tracing(&config.log_level);

        if let Err(e) = cli::run_single_command(config, &args[1], &args[2..]) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
