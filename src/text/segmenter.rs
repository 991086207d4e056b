//! Разбиение текста на фрагменты для модели
//!
//! Фрагменты режутся по границам предложений, соседние предложения
//! склеиваются, пока влезают в лимит. Слишком длинное предложение режется
//! по словам, слишком длинное слово режется по символам. Ни один непробельный
//! символ не теряется. Лимит считается в символах, а не в байтах.

use std::collections::VecDeque;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]\s+").unwrap();
}

/// Текст, который озвучивается вместо пустого ввода
pub const PLACEHOLDER: &str = "...";

/// Фрагмент текста одного элемента контента
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Схлопнуть пробельные последовательности в один пробел и обрезать края
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Разбить текст на предложения по `.`, `!`, `?` с пробелом после
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // Знак препинания однобайтовый
        push_trimmed(&mut sentences, &text[start..m.start() + 1]);
        start = m.end();
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Ленивая последовательность фрагментов
pub fn segment(text: &str, max_chunk_chars: usize) -> Segments {
    Segments::new(text, max_chunk_chars)
}

/// Итератор фрагментов; текст нормализуется один раз при создании
pub struct Segments {
    text: String,
    cursor: usize,
    max_chars: usize,
    pending: VecDeque<String>,
    current: String,
    current_chars: usize,
    index: usize,
    placeholder_pending: bool,
}

impl Segments {
    fn new(text: &str, max_chunk_chars: usize) -> Self {
        let text = normalize_whitespace(text);
        let placeholder_pending = text.is_empty();
        Self {
            text,
            cursor: 0,
            max_chars: max_chunk_chars.max(1),
            pending: VecDeque::new(),
            current: String::new(),
            current_chars: 0,
            index: 0,
            placeholder_pending,
        }
    }

    /// Следующий кусок, гарантированно не длиннее лимита
    fn next_piece(&mut self) -> Option<String> {
        if let Some(piece) = self.pending.pop_front() {
            return Some(piece);
        }
        if self.cursor >= self.text.len() {
            return None;
        }

        let sentence = match SENTENCE_END.find_at(&self.text, self.cursor) {
            Some(m) => {
                let sentence = self.text[self.cursor..m.start() + 1].to_string();
                self.cursor = m.end();
                sentence
            }
            None => {
                let sentence = self.text[self.cursor..].to_string();
                self.cursor = self.text.len();
                sentence
            }
        };

        if sentence.chars().count() <= self.max_chars {
            return Some(sentence);
        }

        self.pending = pack_words(&sentence, self.max_chars).into();
        self.pending.pop_front()
    }

    fn emit(&mut self, text: String) -> Chunk {
        let chunk = Chunk {
            index: self.index,
            text,
        };
        self.index += 1;
        chunk
    }
}

impl Iterator for Segments {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.placeholder_pending {
            self.placeholder_pending = false;
            return Some(self.emit(PLACEHOLDER.to_string()));
        }

        while let Some(piece) = self.next_piece() {
            let piece_chars = piece.chars().count();
            if self.current.is_empty() {
                self.current = piece;
                self.current_chars = piece_chars;
            } else if self.current_chars + 1 + piece_chars <= self.max_chars {
                self.current.push(' ');
                self.current.push_str(&piece);
                self.current_chars += 1 + piece_chars;
            } else {
                let full = std::mem::replace(&mut self.current, piece);
                self.current_chars = piece_chars;
                return Some(self.emit(full));
            }
        }

        if self.current.is_empty() {
            return None;
        }
        let last = std::mem::take(&mut self.current);
        self.current_chars = 0;
        Some(self.emit(last))
    }
}

/// Упаковать слова предложения в куски не длиннее `max_chars`
fn pack_words(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut seg = String::new();
    let mut seg_chars = 0;

    for word in sentence.split_whitespace() {
        let word_chars = word.chars().count();

        if word_chars > max_chars {
            if !seg.is_empty() {
                pieces.push(std::mem::take(&mut seg));
                seg_chars = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for slice in chars.chunks(max_chars) {
                pieces.push(slice.iter().collect());
            }
            continue;
        }

        if seg.is_empty() {
            seg.push_str(word);
            seg_chars = word_chars;
        } else if seg_chars + 1 + word_chars <= max_chars {
            seg.push(' ');
            seg.push_str(word);
            seg_chars += 1 + word_chars;
        } else {
            pieces.push(std::mem::replace(&mut seg, word.to_string()));
            seg_chars = word_chars;
        }
    }

    if !seg.is_empty() {
        pieces.push(seg);
    }
    pieces
}
