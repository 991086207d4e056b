//! Цензура ненормативной лексики
//!
//! Строка разбивается на токены по пробелам; подряд идущие обычные токены
//! склеиваются в одну речевую часть, каждое запрещённое слово становится
//! паузой. Длительность паузы растёт с длиной слова, чтобы сохранить темп речи.

pub mod denylist;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::CensorConfig;
use crate::error::Result;

pub use denylist::{clean_token, parse_custom_words, Denylist, DEFAULT_PROFANITY_WORDS};

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"\S+|\s+").unwrap();
}

/// Отрезок аудиодорожки: речь или пауза
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Speech { text: String },
    Silence { duration_seconds: f64 },
}

impl Part {
    pub fn speech(text: impl Into<String>) -> Self {
        Self::Speech { text: text.into() }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Self::Silence { .. })
    }
}

/// Цензор с настроенными длительностями пауз
#[derive(Debug, Clone)]
pub struct ProfanityCensor {
    denylist: Denylist,
    base_silence_seconds: f64,
    per_char_silence_seconds: f64,
}

impl ProfanityCensor {
    pub fn new(denylist: Denylist, base_silence_seconds: f64, per_char_silence_seconds: f64) -> Self {
        Self {
            denylist,
            base_silence_seconds,
            per_char_silence_seconds,
        }
    }

    pub fn from_config(config: &CensorConfig) -> Result<Self> {
        let denylist = Denylist::from_config(config)?;
        log::debug!("Profanity censor loaded with {} words", denylist.len());
        Ok(Self::new(
            denylist,
            config.base_silence_seconds,
            config.per_char_silence_seconds,
        ))
    }

    /// Длительность паузы вместо токена
    pub fn silence_for(&self, token: &str) -> f64 {
        self.base_silence_seconds + clean_token(token).chars().count() as f64 * self.per_char_silence_seconds
    }

    /// Разбить строку на части. Пустые речевые части не выдаются,
    /// поэтому для пустой строки результат пустой.
    pub fn censor(&self, text: &str) -> Vec<Part> {
        let mut parts = Vec::new();
        let mut speech = String::new();

        for token in TOKEN.find_iter(text).map(|m| m.as_str()) {
            if self.denylist.is_profane(token) {
                flush_speech(&mut speech, &mut parts);
                parts.push(Part::Silence {
                    duration_seconds: self.silence_for(token),
                });
            } else {
                speech.push_str(token);
            }
        }
        flush_speech(&mut speech, &mut parts);

        parts
    }

    /// Повторно применить цензуру к уже размеченной последовательности
    pub fn recensor(&self, parts: &[Part]) -> Vec<Part> {
        parts
            .iter()
            .flat_map(|part| match part {
                Part::Speech { text } => self.censor(text),
                silence => vec![silence.clone()],
            })
            .collect()
    }
}

fn flush_speech(speech: &mut String, parts: &mut Vec<Part>) {
    let text = speech.trim();
    if !text.is_empty() {
        parts.push(Part::speech(text));
    }
    speech.clear();
}
