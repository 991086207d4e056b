//! Модуль подготовки текста для TTS

pub mod segmenter;

pub use segmenter::{normalize_whitespace, segment, split_sentences, Chunk, Segments, PLACEHOLDER};
