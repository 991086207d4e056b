//! Список запрещённых слов и правило сопоставления токенов

use std::collections::BTreeSet;

use crate::config::CensorConfig;
use crate::error::{NarratorError, Result};

/// Слова, которые вырезаются всегда
pub const DEFAULT_PROFANITY_WORDS: &[&str] = &[
    "fuck",
    "fucking",
    "fucked",
    "shit",
    "shitty",
    "bitch",
    "bastard",
    "asshole",
    "motherfucker",
    "dick",
    "pussy",
    "cunt",
    "slut",
    "whore",
];

/// Оставить буквы, цифры и апостроф (ASCII)
pub fn clean_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '\'')
        .collect()
}

/// Набор запрещённых слов (в нижнем регистре)
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    words: BTreeSet<String>,
    prefix_slack: usize,
}

impl Denylist {
    /// Пустой список: ничего не считается запрещённым
    pub fn empty(prefix_slack: usize) -> Self {
        Self {
            words: BTreeSet::new(),
            prefix_slack,
        }
    }

    /// Собрать список из произвольных слов
    pub fn new<I, S>(words: I, prefix_slack: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::empty(prefix_slack);
        for word in words {
            list.insert(word.as_ref())?;
        }
        Ok(list)
    }

    /// Стандартный набор плюс слова из конфигурации
    pub fn from_config(config: &CensorConfig) -> Result<Self> {
        let words = DEFAULT_PROFANITY_WORDS
            .iter()
            .map(|w| w.to_string())
            .chain(parse_custom_words(&config.custom_words));
        Self::new(words, config.prefix_slack)
    }

    fn insert(&mut self, word: &str) -> Result<()> {
        let word = word.trim().to_lowercase();
        if word.chars().any(char::is_whitespace) {
            return Err(NarratorError::Configuration(format!(
                "Denylist entry must be a single word: {:?}",
                word
            )));
        }
        let cleaned = clean_token(&word);
        if cleaned.is_empty() {
            return Err(NarratorError::Configuration(format!(
                "Denylist entry has no letters or digits: {:?}",
                word
            )));
        }
        self.words.insert(cleaned);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    /// Токен запрещён, если его очищенная форма совпадает со словом из списка
    /// или начинается с него и длиннее не более чем на `prefix_slack` символов
    pub fn is_profane(&self, token: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let cleaned = clean_token(token).to_ascii_lowercase();
        if cleaned.is_empty() {
            return false;
        }
        if self.words.contains(&cleaned) {
            return true;
        }
        self.words
            .iter()
            .any(|word| cleaned.starts_with(word.as_str()) && cleaned.len() <= word.len() + self.prefix_slack)
    }
}

/// Разобрать строку вида `"Darn, HECK ,, gosh"`
pub fn parse_custom_words(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
