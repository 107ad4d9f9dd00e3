use anyhow::Result;
use axum::Router;
use clap::Parser;
use engine::rag::ChatModel;
use engine::EngineConfig;
use server::build_app;
use server::chat::HttpChatModel;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, default_value = "./index")]
    index: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8000)]
    port: u16,
    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// OpenAI-compatible chat completions URL; the chat endpoint is disabled without it
    #[arg(long)]
    chat_endpoint: Option<String>,
    /// Chat model name
    #[arg(long, default_value = "gpt-4o-mini")]
    chat_model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let chat: Option<Arc<dyn ChatModel>> = args.chat_endpoint.as_ref().map(|endpoint| {
        tracing::info!(%endpoint, model = %args.chat_model, "chat backend enabled");
        let model = HttpChatModel::new(endpoint.clone(), args.chat_model.clone())
            .with_api_key(std::env::var("CHAT_API_KEY").ok());
        Arc::new(model) as Arc<dyn ChatModel>
    });
    let app: Router = build_app(args.index.clone(), config, chat)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
