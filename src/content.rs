//! Контент треда и его подготовка к озвучиванию
//!
//! Тред приходит готовым JSON-объектом; здесь он превращается в
//! упорядоченные элементы `ContentUnit` с детерминированными именами файлов.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::split_sentences;

lazy_static! {
    static ref URL: Regex =
        Regex::new(r"(?:https?://)?[a-zA-Z0-9./?:@_=#-]+\.[a-zA-Z]{2,6}[a-zA-Z0-9.&/?:@_=#-]*").unwrap();
    static ref AI: Regex = Regex::new(r"\bAI\b").unwrap();
    static ref AGI: Regex = Regex::new(r"\bAGI\b").unwrap();
    static ref QUOTED_PERIOD: Regex = Regex::new(r#"\."\."#).unwrap();
    static ref UNSAFE_ID: Regex = Regex::new(r"[^\w\s-]").unwrap();
}

/// Вид элемента контента
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Title,
    Post,
    Comment,
}

/// Один озвучиваемый элемент; `id` служит именем файла без расширения
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentUnit {
    pub id: String,
    pub kind: UnitKind,
    pub text: String,
}

impl ContentUnit {
    pub fn title(text: impl Into<String>) -> Self {
        Self {
            id: "title".to_string(),
            kind: UnitKind::Title,
            text: text.into(),
        }
    }

    /// Пост целиком
    pub fn post(text: impl Into<String>) -> Self {
        Self {
            id: "postaudio".to_string(),
            kind: UnitKind::Post,
            text: text.into(),
        }
    }

    /// Одно предложение поста
    pub fn post_sentence(index: usize, text: impl Into<String>) -> Self {
        Self {
            id: format!("postaudio-{}", index),
            kind: UnitKind::Post,
            text: text.into(),
        }
    }

    pub fn comment(index: usize, text: impl Into<String>) -> Self {
        Self {
            id: format!("comment-{}", index),
            kind: UnitKind::Comment,
            text: text.into(),
        }
    }
}

/// Текст поста: строкой или уже разбитый на предложения
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PostBody {
    Text(String),
    Sentences(Vec<String>),
}

impl Default for PostBody {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl PostBody {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Sentences(sentences) => sentences.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// Весь пост одной строкой
    pub fn full_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Sentences(sentences) => sentences.join(" "),
        }
    }

    /// Пост по предложениям
    pub fn sentences(&self) -> Vec<String> {
        match self {
            Self::Text(text) => split_post_sentences(text),
            Self::Sentences(sentences) => sentences
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Комментарий треда
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    #[serde(alias = "comment_id", default)]
    pub id: String,
    #[serde(alias = "comment_body")]
    pub body: String,
    #[serde(alias = "comment_url", default)]
    pub url: Option<String>,
}

/// Тред, полученный от сборщика контента
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    #[serde(alias = "thread_id")]
    pub id: String,
    #[serde(alias = "thread_title")]
    pub title: String,
    #[serde(alias = "thread_post", default)]
    pub post: PostBody,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Thread {
    /// Загрузить тред из JSON-файла
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Комментарии, подготовленные к озвучиванию, в исходном порядке
    pub fn comment_units(&self) -> Vec<ContentUnit> {
        self.comments
            .iter()
            .enumerate()
            .map(|(i, c)| ContentUnit::comment(i, prepare_comment_text(&c.body)))
            .collect()
    }
}

/// Подготовить текст комментария: убрать ссылки, превратить переводы строк
/// в границы предложений, расшифровать AI/AGI и гарантировать точку в конце
pub fn prepare_comment_text(raw: &str) -> String {
    let text = URL.replace_all(raw, " ");
    let text = text.replace('\n', ". ");
    let text = AI.replace_all(&text, "A.I");
    let text = AGI.replace_all(&text, "A.G.I");

    let mut text = text.trim_end().to_string();
    if text.trim().is_empty() {
        return String::new();
    }
    if !text.ends_with('.') {
        text.push('.');
    }

    let text = text.replace(". . .", ".").replace(".. . ", ".").replace(". . ", ".");
    QUOTED_PERIOD.replace_all(&text, "\".").into_owned()
}

/// Разбить пост на предложения: переводы строк становятся пробелами,
/// пустые куски отбрасываются
pub fn split_post_sentences(text: &str) -> Vec<String> {
    let text = text.replace('\n', " ");
    split_sentences(&text)
        .into_iter()
        .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

/// Безопасное имя каталога для треда
pub fn sanitize_thread_id(id: &str) -> String {
    let cleaned = UNSAFE_ID.replace_all(id, "").trim().to_string();
    if cleaned.is_empty() {
        "thread".to_string()
    } else {
        cleaned
    }
}
