//! Модуль обработки ошибок библиотеки tts-narrator
//!
//! Ошибки конфигурации останавливают запуск. Сбои отдельных фрагментов и
//! элементов контента сюда не попадают: они деградируют в тишину.

use thiserror::Error;

use crate::worker::WorkerError;

/// Ошибки библиотеки tts-narrator
#[derive(Debug, Error)]
pub enum NarratorError {
    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка чтения/записи WAV
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Ошибка процесса-воркера
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Файл не найден
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Другая ошибка
    #[error("Other error: {0}")]
    Other(String),
}

impl From<&str> for NarratorError {
    fn from(s: &str) -> Self {
        NarratorError::Other(s.to_string())
    }
}

impl From<String> for NarratorError {
    fn from(s: String) -> Self {
        NarratorError::Other(s)
    }
}

/// Тип Result для библиотеки tts-narrator
pub type Result<T> = std::result::Result<T, NarratorError>;
