//! OCI registry server
//!
//! Serves an in-memory registry. Run with:
//! `cargo run -p oci-registry --features cli -- --listen 127.0.0.1:5000`

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use oci_registry::{MemoryRegistry, RegistryBuilder, RegistryConfig};
use tracing_subscriber::EnvFilter;

/// An in-memory OCI distribution registry
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RegistryConfig::from_file(path)?,
        None => RegistryConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let app = RegistryBuilder::new()
        .backend(MemoryRegistry::new())
        .config(&config)
        .build();

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!("OCI Registry listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
