use anyhow::Result;
use axum::Router;
use clap::Parser;
use research_core::IndexConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use server::build_app;
use tokio::net::TcpListener;

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, default_value = "./index")]
    index: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// JSON file with index configuration
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    barrel_count: Option<u32>,
    /// Corpus size used by the IDF term
    #[arg(long)]
    corpus_size: Option<u32>,
    #[arg(long)]
    avg_doc_length: Option<f64>,
    #[arg(long)]
    k1: Option<f64>,
    #[arg(long)]
    b: Option<f64>,
}

impl Args {
    fn index_config(&self) -> Result<IndexConfig> {
        let mut config = match &self.config {
            Some(path) => IndexConfig::from_json_file(path)?,
            None => IndexConfig::default(),
        };
        if let Some(v) = self.barrel_count { config.barrel_count = v; }
        if let Some(v) = self.corpus_size { config.corpus_size = v; }
        if let Some(v) = self.avg_doc_length { config.avg_doc_length = v; }
        if let Some(v) = self.k1 { config.k1 = v; }
        if let Some(v) = self.b { config.b = v; }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = args.index_config()?;
    let app: Router = build_app(args.index.clone(), config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
