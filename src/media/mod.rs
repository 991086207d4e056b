//! Модуль для работы с аудиоклипами
//!
//! Клип описывается путём и длительностью; длительность всегда берётся
//! из самого файла, а не из ожиданий вызывающего кода.

pub mod audio;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Качество результата синтеза
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ClipStatus {
    /// Все фрагменты синтезированы моделью
    Ok,
    /// Часть фрагментов заменена тишиной
    Degraded { failed_chunks: usize },
}

impl ClipStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Готовый аудиоклип
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedClip {
    /// Путь к файлу
    pub path: PathBuf,
    /// Длительность в секундах
    pub duration_seconds: f64,
    /// Качество результата
    pub status: ClipStatus,
    /// Из скольких фрагментов собран клип
    pub chunk_count: usize,
}

impl GeneratedClip {
    /// Измерить файл и вернуть клип со статусом `Ok`
    pub async fn probe(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let duration_seconds = audio::probe_duration(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            duration_seconds,
            status: ClipStatus::Ok,
            chunk_count: 1,
        })
    }

    pub fn with_status(mut self, status: ClipStatus, chunk_count: usize) -> Self {
        self.status = status;
        self.chunk_count = chunk_count;
        self
    }
}
