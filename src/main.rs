//! caching-proxy entry point.
//!
//! Either clears the persisted cache and exits, or binds the listener and
//! serves until Ctrl-C. Logs go to stderr; `RUST_LOG` adjusts verbosity.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use caching_proxy::cache::{FileStore, ResponseCache};
use caching_proxy::cli::{Cli, CliError, Mode, ProxyConfig};
use caching_proxy::server::Server;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn clear_cache(cache_file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut cache = ResponseCache::new(FileStore::new(cache_file));
    cache.clear().await?;
    println!("Cache cleared.");
    Ok(())
}

async fn serve(config: ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    let proxy = config.build_proxy()?;
    let server = Server::bind(config.listen_addr()).await?;

    println!("Proxy server running on port {}", server.local_addr().port());
    info!(
        address = %server.local_addr(),
        origin = %config.origin,
        cache_file = %config.cache_file.display(),
        "proxy started"
    );

    let proxy = server
        .run(proxy, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!(entries = proxy.cache().len(), "proxy stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let mode = match Mode::from_cli(&cli) {
        Ok(mode) => mode,
        Err(e) => {
            let kind = match e {
                CliError::MissingServeArgs => ErrorKind::MissingRequiredArgument,
                CliError::InvalidPort | CliError::InvalidOrigin(_) => ErrorKind::ValueValidation,
            };
            Cli::command().error(kind, e).exit()
        }
    };

    let result = match mode {
        Mode::ClearCache { cache_file } => clear_cache(cache_file).await,
        Mode::Serve(config) => serve(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
