//! Модуль конфигурации библиотеки tts-narrator
//!
//! Конфигурация читается один раз при запуске и дальше только передаётся
//! по ссылке. Любое поле можно опустить в JSON: будет взято значение по умолчанию.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NarratorError, Result};

/// Режим озвучивания треда
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Заголовок и комментарии в пределах бюджета
    Comments,
    /// Заголовок и текст поста, без проверки бюджета
    Story,
    /// Заголовок, текст поста, затем ограниченное число комментариев
    Hybrid,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Comments
    }
}

/// Как озвучивать текст поста в режимах story/hybrid
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoryMethod {
    /// Один клип на весь пост
    SinglePost,
    /// Отдельный клип на каждое предложение
    Sentences,
}

impl Default for StoryMethod {
    fn default() -> Self {
        Self::SinglePost
    }
}

/// Что делать с элементом, после которого бюджет превышен
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Вычесть длительность последнего элемента и не учитывать его
    RollbackLast,
    /// Оставить последний элемент и остановиться
    KeepLast,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::RollbackLast
    }
}

/// Настройки цензуры ненормативной лексики
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CensorConfig {
    /// Включить замену слов тишиной
    pub enabled: bool,
    /// Базовая длительность тишины на слово (сек)
    pub base_silence_seconds: f64,
    /// Добавка за каждый символ слова (сек)
    pub per_char_silence_seconds: f64,
    /// Насколько длиннее запрещённого слова может быть токен с тем же префиксом
    pub prefix_slack: usize,
    /// Дополнительные слова через запятую
    pub custom_words: String,
}

impl Default for CensorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_silence_seconds: 0.35,
            per_char_silence_seconds: 0.02,
            prefix_slack: 3,
            custom_words: String::new(),
        }
    }
}

/// Одна ступень каскада попыток синтеза
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptTier {
    /// Устройство, например `cuda:0` или `cpu`
    pub device: String,
    /// Точность вычислений: `bfloat16`, `float16`, `float32`
    pub precision: String,
    /// Лимит токенов генерации
    pub max_tokens: u32,
    /// Таймаут попытки (сек)
    pub timeout_seconds: u64,
    /// Использовать постоянный воркер из пула (иначе разовый запуск CLI)
    #[serde(default = "default_pooled")]
    pub pooled: bool,
}

fn default_pooled() -> bool {
    true
}

impl AttemptTier {
    pub fn new(device: &str, precision: &str, max_tokens: u32, timeout_seconds: u64) -> Self {
        Self {
            device: device.to_string(),
            precision: precision.to_string(),
            max_tokens,
            timeout_seconds,
            pooled: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Упорядоченный список ступеней: от самой быстрой к самой надёжной
pub type AttemptPlan = Vec<AttemptTier>;

/// Каскад по умолчанию: GPU bf16, GPU fp16, CPU fp32
pub fn default_attempt_plan() -> AttemptPlan {
    vec![
        AttemptTier::new("cuda:0", "bfloat16", 220, 420),
        AttemptTier::new("cuda:0", "float16", 180, 360),
        AttemptTier::new("cpu", "float32", 180, 420),
    ]
}

/// Настройки клонирования голоса и воркеров инференса
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Интерпретатор, запускающий скрипты воркера
    pub program: PathBuf,
    /// Скрипт постоянного воркера (JSON-строки через stdin/stdout)
    pub worker_script: PathBuf,
    /// Скрипт разового синтеза через аргументы командной строки
    pub clone_script: Option<PathBuf>,
    /// Идентификатор модели, передаётся воркеру как `--model`
    pub model: Option<String>,
    /// Образец голоса
    pub ref_audio: PathBuf,
    /// Транскрипт образца голоса
    pub ref_text_file: PathBuf,
    /// Язык синтеза
    pub language: String,
    /// Использовать пул постоянных воркеров
    pub persistent: bool,
    /// Сколько ждать сообщения о готовности воркера (сек)
    pub startup_timeout_seconds: u64,
    /// Максимальный размер фрагмента для одного запроса к модели
    pub max_chunk_chars: usize,
    /// Максимальный размер текста для одного вызова бэкенда
    pub max_call_chars: usize,
    /// Частота дискретизации промежуточных фрагментов
    pub chunk_sample_rate: u32,
    /// Длительность тишины вместо фрагмента, который не удалось синтезировать
    pub failure_silence_seconds: f64,
    /// Каскад попыток
    pub attempt_plan: AttemptPlan,
    /// Каталог, добавляемый в начало PATH воркера (например, SoX)
    pub extra_path: Option<PathBuf>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python3"),
            worker_script: PathBuf::from("tts_worker.py"),
            clone_script: None,
            model: None,
            ref_audio: PathBuf::from("voice_samples/ref.wav"),
            ref_text_file: PathBuf::from("voice_samples/ref.txt"),
            language: "English".to_string(),
            persistent: true,
            startup_timeout_seconds: 600,
            max_chunk_chars: 900,
            max_call_chars: 5000,
            chunk_sample_rate: 24000,
            failure_silence_seconds: 0.4,
            attempt_plan: default_attempt_plan(),
            extra_path: None,
        }
    }
}

impl VoiceConfig {
    /// Переопределить пути из переменных окружения `NARRATOR_*`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NARRATOR_PYTHON") {
            self.program = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("NARRATOR_WORKER_SCRIPT") {
            self.worker_script = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("NARRATOR_CLONE_SCRIPT") {
            self.clone_script = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("NARRATOR_REF_AUDIO") {
            self.ref_audio = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("NARRATOR_REF_TEXT") {
            self.ref_text_file = PathBuf::from(v);
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }
}

/// Контейнер итоговых клипов
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioContainer {
    Mp3,
    Wav,
}

impl AudioContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }
}

/// Единый формат итоговых клипов, на который рассчитывает сборка видео
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputFormat {
    pub container: AudioContainer,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            container: AudioContainer::Mp3,
            sample_rate: 44100,
            channels: 1,
            bitrate: "192k".to_string(),
        }
    }
}

/// Конфигурация библиотеки
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorConfig {
    /// Максимальная суммарная длительность аудио (сек)
    pub max_total_seconds: f64,
    /// Корневой каталог для файлов запуска
    pub work_dir: PathBuf,
    /// Режим озвучивания
    pub mode: RunMode,
    /// Способ озвучивания поста
    pub story_method: StoryMethod,
    /// Сколько комментариев озвучивать в гибридном режиме
    pub hybrid_comments_count: usize,
    /// Политика при превышении бюджета
    pub overflow_policy: OverflowPolicy,
    /// Тишина после склеенного из частей элемента (сек)
    pub split_silence_seconds: f64,
    pub censor: CensorConfig,
    pub voice: VoiceConfig,
    pub output: OutputFormat,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            max_total_seconds: 50.0,
            work_dir: PathBuf::from("assets/temp"),
            mode: RunMode::default(),
            story_method: StoryMethod::default(),
            hybrid_comments_count: 1,
            overflow_policy: OverflowPolicy::default(),
            split_silence_seconds: 0.3,
            censor: CensorConfig::default(),
            voice: VoiceConfig::default(),
            output: OutputFormat::default(),
        }
    }
}

impl NarratorConfig {
    /// Загрузить конфигурацию из JSON-файла; если файла нет, вернуть значения по умолчанию
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Проверить значения, которые нельзя исправить на ходу
    pub fn validate(&self) -> Result<()> {
        if !(self.max_total_seconds > 0.0) {
            return Err(NarratorError::Configuration(format!(
                "max_total_seconds must be positive, got {}",
                self.max_total_seconds
            )));
        }
        if self.voice.max_chunk_chars == 0 || self.voice.max_call_chars == 0 {
            return Err(NarratorError::Configuration(
                "max_chunk_chars and max_call_chars must be non-zero".to_string(),
            ));
        }
        if self.voice.attempt_plan.is_empty() {
            return Err(NarratorError::Configuration("attempt_plan is empty".to_string()));
        }
        if self.censor.base_silence_seconds < 0.0 || self.censor.per_char_silence_seconds < 0.0 {
            return Err(NarratorError::Configuration(
                "censor silence durations must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
