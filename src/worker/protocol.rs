//! Протокол постоянного воркера: по одному JSON-объекту на строку в каждую сторону
//!
//! Воркер сначала печатает ровно одно сообщение о готовности, затем на каждую
//! строку запроса отвечает ровно одной строкой.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::WorkerError;

/// Первое сообщение воркера после загрузки модели
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadyMessage {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default, alias = "dtype")]
    pub precision: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Запрос на синтез одного фрагмента
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub out: PathBuf,
    pub language: String,
    pub max_new_tokens: u32,
}

/// Управляющая команда
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ControlCommand {
    Shutdown,
}

/// Ответ воркера на запрос или команду
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub out: Option<PathBuf>,
    #[serde(default, alias = "sr")]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub shutdown: bool,
}

/// Сериализовать сообщение в одну строку с переводом строки в конце
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, WorkerError> {
    let mut line = serde_json::to_string(message).map_err(|e| WorkerError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Разобрать одну строку ответа
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, WorkerError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(WorkerError::Protocol("empty line".to_string()));
    }
    serde_json::from_str(line).map_err(|e| WorkerError::Protocol(format!("{}: {:?}", e, line)))
}
