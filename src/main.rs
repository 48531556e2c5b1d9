mod config;
mod controller;
mod identifier;
mod narration;
mod routes;
mod storage;
mod story;


#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use poem::listener::TcpListener;
use poem::Server;
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;
use crate::controller::StoryController;
use crate::narration::NarrationSynthesizer;
use crate::storage::{FileStore, AUDIO_EXTENSION, IMAGE_EXTENSION};
use crate::story::{OpenAiStoryTeller, StoryGenerator};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct ServerConfig {
    #[arg(long, default_value = "127.0.0.1", env = "NARRATOR_HOST")]
    /// The binding host address of the server.
    host: String,

    #[arg(long, default_value_t = 8000, env = "NARRATOR_PORT")]
    port: u16,

    #[arg(long, env = "NARRATOR_CONFIG")]
    /// The file path to a given config file.
    ///
    /// All settings fall back to their defaults when this is not given.
    config: Option<PathBuf>,

    #[arg(long, default_value = "/docs", env = "NARRATOR_DOCS_URL")]
    /// The path the API documentation is served from.
    docs_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    /// The credential used for the remote story and speech services.
    openai_api_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("narrator=info,poem=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: ServerConfig = ServerConfig::parse();

    let cfg = match args.config.as_deref() {
        Some(path) => RuntimeConfig::from_file(path).await?,
        None => RuntimeConfig::default(),
    };

    let controller = build_controller(&cfg, &args.openai_api_key)?;
    controller.ensure_directories().await?;

    let app = routes::build_app(Arc::new(controller), &args.docs_url);

    let bind = format!("{}:{}", args.host, args.port);
    info!("Narrator listening on http://{}", &bind);
    info!("API docs available at http://{}{}", &bind, &args.docs_url);

    Server::new(TcpListener::bind(bind)).run(app).await?;

    Ok(())
}

fn build_controller(cfg: &RuntimeConfig, api_key: &str) -> anyhow::Result<StoryController> {
    let uploads = FileStore::new(&cfg.storage.uploads_directory, IMAGE_EXTENSION);
    let audio = FileStore::new(&cfg.storage.audio_directory, AUDIO_EXTENSION);

    let teller = OpenAiStoryTeller::new(cfg.story.clone(), api_key.to_string())?;
    let stories = StoryGenerator::new(Arc::new(teller), cfg.story.timeout());

    let engine = cfg.narration.engine.build(api_key)?;
    let narrator = NarrationSynthesizer::new(engine, &cfg.narration, audio.clone());

    info!(
        uploads = ?uploads.directory(),
        audio = ?audio.directory(),
        model = %cfg.story.model,
        "Configured story pipeline"
    );

    Ok(StoryController::new(uploads, audio, stories, narrator))
}
