//! Основной файл библиотеки tts-narrator
//!
//! Библиотека озвучивает тред (заголовок, пост, комментарии) голосом,
//! клонированным внешней моделью, укладываясь в бюджет по длительности
//! и при необходимости заменяя ненормативную лексику паузами.

pub mod backend;
pub mod censor;
pub mod config;
pub mod content;
pub mod error;
pub mod media;
pub mod narration;
pub mod text;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod test_support;

use crate::backend::{SynthesisBackend, VoiceCloneBackend};
use crate::config::{AudioContainer, NarratorConfig};
use crate::content::Thread;
use crate::error::Result;
use crate::narration::{NarrationSummary, Narrator};
use crate::utils::ffmpeg::check_ffmpeg_installed;

pub use crate::error::NarratorError;

/// Основная структура: бэкенд клонирования голоса и оркестратор
pub struct TtsNarrator {
    narrator: Narrator<VoiceCloneBackend>,
}

impl TtsNarrator {
    /// Проверить конфигурацию и подготовить бэкенд. Воркеры запускаются
    /// лениво, при первом синтезе.
    pub fn new(config: NarratorConfig) -> Result<Self> {
        config.validate()?;
        if config.output.container != AudioContainer::Wav && !check_ffmpeg_installed() {
            return Err(NarratorError::Configuration(format!(
                "ffmpeg is required for {} output",
                config.output.container.extension()
            )));
        }
        let backend = VoiceCloneBackend::new(
            config.voice.clone(),
            config.output.clone(),
            config.work_dir.join("scratch"),
        )?;
        Ok(Self {
            narrator: Narrator::new(config, backend)?,
        })
    }

    /// Озвучить один тред
    pub async fn process(&self, thread: &Thread) -> Result<NarrationSummary> {
        self.narrator.run(thread).await
    }

    /// Остановить процессы воркеров
    pub async fn shutdown(&self) {
        self.narrator.backend().shutdown().await;
    }
}
