//! Бэкенды синтеза речи

pub mod voice_clone;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::media::GeneratedClip;

pub use voice_clone::VoiceCloneBackend;

/// Трейт, который реализуют все бэкенды синтеза
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Озвучить `text` и записать результат в `dest`.
    /// Ошибка означает, что файла нет; частичные сбои отражаются в `ClipStatus`.
    async fn synthesize(&self, text: &str, dest: &Path) -> Result<GeneratedClip>;

    /// Сколько символов можно передать за один вызов
    fn max_chars(&self) -> usize;

    /// Освободить внешние ресурсы (процессы воркеров)
    async fn shutdown(&self) {}
}
