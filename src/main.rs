use anyhow::{bail, Context, Result};
use tts_narrator::config::NarratorConfig;
use tts_narrator::content::Thread;
use tts_narrator::utils::logger::init_logger;
use tts_narrator::TtsNarrator;

const USAGE: &str = "usage: tts-narrator <thread.json> [config.json]";

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let mut args = std::env::args().skip(1);
    let Some(thread_path) = args.next() else {
        bail!(USAGE);
    };
    let config_path = args.next().unwrap_or_else(|| "narrator.json".to_string());

    let mut config = NarratorConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path))?;
    config.voice.apply_env_overrides();

    let thread = Thread::from_json_file(&thread_path)
        .with_context(|| format!("Failed to read thread {}", thread_path))?;

    let narrator = TtsNarrator::new(config).context("Invalid narration setup")?;
    let result = narrator.process(&thread).await;
    narrator.shutdown().await;

    let summary = result.context("Narration failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
