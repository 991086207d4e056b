//! Оркестратор озвучки треда
//!
//! Проход идёт по стадиям: заголовок, затем пост и/или комментарии в
//! зависимости от режима. Каждый элемент превращается в отдельный файл в
//! `<work_dir>/<thread_id>/audio`; длительности копятся в `Budget`.
//! Сбой одного элемента не прерывает проход: он учитывается как ноль секунд.

pub mod budget;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::backend::SynthesisBackend;
use crate::censor::{Part, ProfanityCensor};
use crate::config::{NarratorConfig, RunMode, StoryMethod};
use crate::content::{sanitize_thread_id, ContentUnit, Thread, UnitKind};
use crate::error::{NarratorError, Result};
use crate::media::audio::{concat_clips, write_silence};
use crate::media::{ClipStatus, GeneratedClip};
use crate::text::segment;
use crate::utils::temp::TempFileManager;

pub use budget::{Budget, BudgetDecision};

/// Стадия прохода по треду
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationStage {
    Start,
    TitleSynthesized,
    /// Очередной кусок поста
    Body(usize),
    /// Очередной комментарий
    Comments(usize),
    Done,
}

/// Результат озвучки одного элемента
#[derive(Debug, Clone, Serialize)]
pub struct UnitAudio {
    pub id: String,
    pub kind: UnitKind,
    /// `None`, если синтез не удался
    pub clip: Option<GeneratedClip>,
    /// Входит ли элемент в итоговую дорожку (откаченный по бюджету не входит)
    pub counted: bool,
}

/// Итог запуска для сборщика видео
#[derive(Debug, Clone, Serialize)]
pub struct NarrationSummary {
    pub total_seconds: f64,
    /// Элементы после заголовка, вошедшие в дорожку
    pub item_count: usize,
    pub last_index: Option<usize>,
    pub stopped_by_budget: bool,
    pub degraded_units: usize,
    pub audio_dir: PathBuf,
    pub units: Vec<UnitAudio>,
}

/// Состояние одного прохода
struct Run {
    audio_dir: PathBuf,
    scratch_root: PathBuf,
    budget: Budget,
    post_units: Vec<ContentUnit>,
    comment_units: Vec<ContentUnit>,
    comment_limit: usize,
    post_items: usize,
    degraded_units: usize,
    stopped_by_budget: bool,
    units: Vec<UnitAudio>,
}

/// Накопитель файлов, из которых склеивается один клип
#[derive(Default)]
struct Assembly {
    files: Vec<PathBuf>,
    chunks: usize,
    failed: usize,
}

impl Assembly {
    fn push_clip(&mut self, clip: GeneratedClip) {
        self.chunks += clip.chunk_count;
        if let ClipStatus::Degraded { failed_chunks } = clip.status {
            self.failed += failed_chunks;
        }
        self.files.push(clip.path);
    }

    fn push_silence(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    fn push_failure(&mut self) {
        self.failed += 1;
    }

    async fn finish(self, dest: &Path, scratch: &mut TempFileManager) -> Result<GeneratedClip> {
        if self.files.is_empty() {
            return Err(NarratorError::AudioProcessing(format!(
                "No audio produced for {}",
                dest.display()
            )));
        }
        concat_clips(&self.files, dest, scratch).await?;

        let status = if self.failed == 0 {
            ClipStatus::Ok
        } else {
            ClipStatus::Degraded {
                failed_chunks: self.failed,
            }
        };
        Ok(GeneratedClip::probe(dest).await?.with_status(status, self.chunks))
    }
}

/// Оркестратор
pub struct Narrator<B: SynthesisBackend> {
    config: NarratorConfig,
    backend: B,
    censor: Option<ProfanityCensor>,
}

impl<B: SynthesisBackend> Narrator<B> {
    /// Собрать оркестратор; неверный список слов цензуры считается ошибкой конфигурации
    pub fn new(config: NarratorConfig, backend: B) -> Result<Self> {
        let censor = if config.censor.enabled {
            Some(ProfanityCensor::from_config(&config.censor)?)
        } else {
            None
        };
        Ok(Self {
            config,
            backend,
            censor,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Озвучить тред
    pub async fn run(&self, thread: &Thread) -> Result<NarrationSummary> {
        let run_dir = self.config.work_dir.join(sanitize_thread_id(&thread.id));
        let audio_dir = run_dir.join("audio");
        tokio::fs::create_dir_all(&audio_dir).await?;

        let post_units = match self.config.mode {
            RunMode::Comments => Vec::new(),
            RunMode::Story | RunMode::Hybrid => self.post_units(thread),
        };
        let comment_units = match self.config.mode {
            RunMode::Story => Vec::new(),
            RunMode::Comments | RunMode::Hybrid => thread.comment_units(),
        };
        let comment_limit = match self.config.mode {
            RunMode::Story => 0,
            RunMode::Comments => comment_units.len(),
            RunMode::Hybrid => self.config.hybrid_comments_count.min(comment_units.len()),
        };

        log::info!(
            "Narrating thread {} ({:?} mode, {} post units, {} comments, budget {:.1}s)",
            thread.id,
            self.config.mode,
            post_units.len(),
            comment_limit,
            self.config.max_total_seconds
        );

        let mut run = Run {
            audio_dir: audio_dir.clone(),
            scratch_root: run_dir.join("tmp"),
            budget: Budget::new(self.config.max_total_seconds),
            post_units,
            comment_units,
            comment_limit,
            post_items: 0,
            degraded_units: 0,
            stopped_by_budget: false,
            units: Vec::new(),
        };

        let title = ContentUnit::title(thread.title.as_str());
        let mut stage = NarrationStage::Start;
        while stage != NarrationStage::Done {
            stage = self.step(stage, &title, &mut run).await;
            log::debug!("Narration stage: {:?}", stage);
        }

        let item_count = run.post_items + run.budget.items;
        let summary = NarrationSummary {
            total_seconds: run.budget.consumed_seconds,
            item_count,
            last_index: item_count.checked_sub(1),
            stopped_by_budget: run.stopped_by_budget,
            degraded_units: run.degraded_units,
            audio_dir,
            units: run.units,
        };

        log::info!(
            "Narration finished: {:.2}s across {} items ({} degraded)",
            summary.total_seconds,
            summary.item_count,
            summary.degraded_units
        );
        Ok(summary)
    }

    fn post_units(&self, thread: &Thread) -> Vec<ContentUnit> {
        if thread.post.is_blank() {
            return Vec::new();
        }
        match self.config.story_method {
            StoryMethod::SinglePost => vec![ContentUnit::post(thread.post.full_text())],
            StoryMethod::Sentences => thread
                .post
                .sentences()
                .into_iter()
                .enumerate()
                .map(|(i, s)| ContentUnit::post_sentence(i, s))
                .collect(),
        }
    }

    async fn step(&self, stage: NarrationStage, title: &ContentUnit, run: &mut Run) -> NarrationStage {
        match stage {
            NarrationStage::Start => {
                let duration = self.narrate(title, run).await;
                run.budget = run.budget.exempt(duration);
                NarrationStage::TitleSynthesized
            }
            NarrationStage::TitleSynthesized => match self.config.mode {
                RunMode::Comments => NarrationStage::Comments(0),
                _ if !run.post_units.is_empty() => NarrationStage::Body(0),
                RunMode::Hybrid => NarrationStage::Comments(0),
                RunMode::Story => NarrationStage::Done,
            },
            NarrationStage::Body(i) => {
                let unit = run.post_units[i].clone();
                let duration = self.narrate(&unit, run).await;
                run.budget = run.budget.exempt(duration);
                run.post_items += 1;

                if i + 1 < run.post_units.len() {
                    NarrationStage::Body(i + 1)
                } else if self.config.mode == RunMode::Hybrid {
                    NarrationStage::Comments(0)
                } else {
                    NarrationStage::Done
                }
            }
            NarrationStage::Comments(k) => {
                if k >= run.comment_limit {
                    return NarrationStage::Done;
                }
                if k >= 1 && run.budget.is_exhausted() {
                    log::info!("Budget already exhausted before comment {}, stopping", k);
                    run.stopped_by_budget = true;
                    return NarrationStage::Done;
                }

                let unit = run.comment_units[k].clone();
                let duration = self.narrate(&unit, run).await;
                let (budget, decision) = run.budget.apply(duration, self.config.overflow_policy);
                run.budget = budget;

                match decision {
                    BudgetDecision::Continue => NarrationStage::Comments(k + 1),
                    BudgetDecision::Stop { rolled_back } => {
                        log::info!(
                            "Budget of {:.1}s exceeded at {} ({})",
                            self.config.max_total_seconds,
                            unit.id,
                            if rolled_back { "rolled back" } else { "kept" }
                        );
                        if rolled_back {
                            if let Some(last) = run.units.last_mut() {
                                last.counted = false;
                            }
                        }
                        run.stopped_by_budget = true;
                        NarrationStage::Done
                    }
                }
            }
            NarrationStage::Done => NarrationStage::Done,
        }
    }

    /// Озвучить элемент и вернуть его длительность; сбой даёт ноль
    async fn narrate(&self, unit: &ContentUnit, run: &mut Run) -> f64 {
        let dest = run
            .audio_dir
            .join(format!("{}.{}", unit.id, self.config.output.container.extension()));

        let result = if unit.text.chars().count() > self.backend.max_chars() {
            self.synthesize_split(unit, &dest, &run.scratch_root).await
        } else {
            self.synthesize_text(&unit.text, &dest, &unit.id, &run.scratch_root).await
        };

        let (clip, duration) = match result {
            Ok(clip) => {
                if clip.status.is_degraded() {
                    log::warn!("{} synthesized with {:?}", unit.id, clip.status);
                    run.degraded_units += 1;
                }
                let duration = clip.duration_seconds;
                (Some(clip), duration)
            }
            Err(e) => {
                log::warn!("Failed to synthesize {}: {}", unit.id, e);
                (None, 0.0)
            }
        };

        run.units.push(UnitAudio {
            id: unit.id.clone(),
            kind: unit.kind,
            clip,
            counted: true,
        });
        duration
    }

    /// Один вызов бэкенда или, при включённой цензуре, склейка речи и тишины
    async fn synthesize_text(&self, text: &str, dest: &Path, stem: &str, scratch_root: &Path) -> Result<GeneratedClip> {
        let parts = match &self.censor {
            Some(censor) => censor.censor(text),
            None => Vec::new(),
        };
        if !parts.iter().any(Part::is_silence) {
            return self.backend.synthesize(text, dest).await;
        }

        log::debug!("Censoring {} into {} parts", stem, parts.len());
        let extension = self.config.output.container.extension();
        let mut scratch = TempFileManager::new_in(scratch_root)?;
        let mut assembly = Assembly::default();

        for (i, part) in parts.iter().enumerate() {
            let path = scratch.named_path(&format!("{}.part{}.{}", stem, i, extension));
            match part {
                Part::Speech { text } => match self.backend.synthesize(text, &path).await {
                    Ok(clip) => assembly.push_clip(clip),
                    Err(e) => {
                        log::warn!("Speech part {} of {} failed: {}", i, stem, e);
                        assembly.push_failure();
                    }
                },
                Part::Silence { duration_seconds } => {
                    write_silence(
                        &path,
                        *duration_seconds,
                        self.config.output.sample_rate,
                        self.config.output.channels,
                    )
                    .await?;
                    assembly.push_silence(path);
                }
            }
        }

        assembly.finish(dest, &mut scratch).await
    }

    /// Длинный элемент: куски по лимиту бэкенда, склейка и пауза в конце
    async fn synthesize_split(&self, unit: &ContentUnit, dest: &Path, scratch_root: &Path) -> Result<GeneratedClip> {
        let extension = self.config.output.container.extension();
        let mut scratch = TempFileManager::new_in(scratch_root)?;
        let mut assembly = Assembly::default();

        for piece in segment(&unit.text, self.backend.max_chars()) {
            let stem = format!("{}-{}", unit.id, piece.index);
            let path = scratch.named_path(&format!("{}.part.{}", stem, extension));
            match self.synthesize_text(&piece.text, &path, &stem, scratch_root).await {
                Ok(clip) => assembly.push_clip(clip),
                Err(e) => {
                    log::warn!("Piece {} of {} failed: {}", piece.index, unit.id, e);
                    assembly.push_failure();
                }
            }
        }
        log::debug!("{} split into {} pieces", unit.id, assembly.files.len() + assembly.failed);

        if !assembly.files.is_empty() {
            let silence = scratch.named_path(&format!("{}.silence.{}", unit.id, extension));
            write_silence(
                &silence,
                self.config.split_silence_seconds,
                self.config.output.sample_rate,
                self.config.output.channels,
            )
            .await?;
            assembly.push_silence(silence);
        }

        assembly.finish(dest, &mut scratch).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{AudioContainer, CensorConfig, OutputFormat};
    use crate::content::{Comment, PostBody};

    const RATE: u32 = 24000;

    /// Бэкенд, который пишет тишину заданной длительности
    struct FakeBackend {
        default_seconds: f64,
        durations: HashMap<String, f64>,
        max_chars: usize,
        channels: u16,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn new(default_seconds: f64) -> Self {
            Self {
                default_seconds,
                durations: HashMap::new(),
                max_chars: 5000,
                channels: 1,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, text: &str, seconds: f64) -> Self {
            self.durations.insert(text.to_string(), seconds);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SynthesisBackend for FakeBackend {
        async fn synthesize(&self, text: &str, dest: &Path) -> Result<GeneratedClip> {
            self.calls.lock().unwrap().push(text.to_string());
            if text.contains("@fail") {
                return Err(NarratorError::Other("synthetic failure".to_string()));
            }
            let seconds = self.durations.get(text).copied().unwrap_or(self.default_seconds);
            write_silence(dest, seconds, RATE, self.channels).await?;
            GeneratedClip::probe(dest).await
        }

        fn max_chars(&self) -> usize {
            self.max_chars
        }
    }

    fn config(dir: &Path, max_total_seconds: f64) -> NarratorConfig {
        NarratorConfig {
            max_total_seconds,
            work_dir: dir.to_path_buf(),
            output: OutputFormat {
                container: AudioContainer::Wav,
                sample_rate: RATE,
                channels: 1,
                ..OutputFormat::default()
            },
            ..NarratorConfig::default()
        }
    }

    fn thread(post: &str, comments: &[&str]) -> Thread {
        Thread {
            id: "t/1".to_string(),
            title: "Title".to_string(),
            post: PostBody::Text(post.to_string()),
            comments: comments
                .iter()
                .enumerate()
                .map(|(i, body)| Comment {
                    id: format!("c{}", i),
                    body: body.to_string(),
                    url: None,
                })
                .collect(),
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-3, "{} != {}", actual, expected);
    }

    #[tokio::test]
    async fn test_comments_stop_and_roll_back_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(2.0).with("Title", 1.0);
        let narrator = Narrator::new(config(dir.path(), 6.0), backend).unwrap();

        let summary = narrator.run(&thread("", &["one", "two", "three", "four"])).await.unwrap();

        assert_close(summary.total_seconds, 5.0);
        assert_eq!(summary.item_count, 2);
        assert_eq!(summary.last_index, Some(1));
        assert!(summary.stopped_by_budget);

        let ids: Vec<&str> = summary.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["title", "comment-0", "comment-1", "comment-2"]);
        assert!(!summary.units[3].counted);
        // Файл откаченного элемента остаётся на диске
        assert!(summary.audio_dir.join("comment-2.wav").exists());
        assert!(!narrator.backend().calls().contains(&"four.".to_string()));
        assert!(summary.audio_dir.ends_with("t1/audio"));
    }

    #[tokio::test]
    async fn test_keep_last_policy_counts_overflowing_comment() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 6.0);
        cfg.overflow_policy = crate::config::OverflowPolicy::KeepLast;
        let narrator = Narrator::new(cfg, FakeBackend::new(2.0).with("Title", 1.0)).unwrap();

        let summary = narrator.run(&thread("", &["one", "two", "three", "four"])).await.unwrap();
        assert_close(summary.total_seconds, 7.0);
        assert_eq!(summary.item_count, 3);
    }

    #[tokio::test]
    async fn test_title_is_synthesized_regardless_of_budget() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = Narrator::new(config(dir.path(), 1.0), FakeBackend::new(3.0)).unwrap();

        let summary = narrator.run(&thread("", &[])).await.unwrap();
        assert_close(summary.total_seconds, 3.0);
        assert_eq!(summary.item_count, 0);
        assert_eq!(summary.last_index, None);
        assert_eq!(summary.units.len(), 1);
    }

    #[tokio::test]
    async fn test_story_sentences_ignore_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 1.0);
        cfg.mode = RunMode::Story;
        cfg.story_method = StoryMethod::Sentences;
        let narrator = Narrator::new(cfg, FakeBackend::new(1.0)).unwrap();

        let summary = narrator
            .run(&thread("First one. Second one.\nThird one.", &["ignored"]))
            .await
            .unwrap();

        let ids: Vec<&str> = summary.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["title", "postaudio-0", "postaudio-1", "postaudio-2"]);
        assert_close(summary.total_seconds, 4.0);
        assert_eq!(summary.item_count, 3);
        assert!(!summary.stopped_by_budget);
    }

    #[tokio::test]
    async fn test_hybrid_post_then_limited_comments() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 50.0);
        cfg.mode = RunMode::Hybrid;
        cfg.hybrid_comments_count = 1;
        let narrator = Narrator::new(cfg, FakeBackend::new(1.0)).unwrap();

        let summary = narrator.run(&thread("The whole post.", &["first", "second"])).await.unwrap();

        let ids: Vec<&str> = summary.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["title", "postaudio", "comment-0"]);
        assert_eq!(summary.item_count, 2);
        assert_eq!(narrator.backend().calls(), vec!["Title", "The whole post.", "first."]);
    }

    #[tokio::test]
    async fn test_censored_comment_is_spliced_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 50.0);
        cfg.censor = CensorConfig {
            enabled: true,
            ..CensorConfig::default()
        };
        let narrator = Narrator::new(cfg, FakeBackend::new(2.0)).unwrap();

        let summary = narrator.run(&thread("", &["what the fuck man"])).await.unwrap();

        assert_eq!(narrator.backend().calls(), vec!["Title", "what the", "man."]);
        let clip = summary.units[1].clip.as_ref().unwrap();
        assert_close(clip.duration_seconds, 2.0 + 2.0 + 0.35 + 4.0 * 0.02);
        assert_eq!(clip.status, ClipStatus::Ok);
    }

    #[tokio::test]
    async fn test_over_long_comment_is_split_with_trailing_silence() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = FakeBackend::new(2.0);
        backend.max_chars = 20;
        let narrator = Narrator::new(config(dir.path(), 50.0), backend).unwrap();

        let summary = narrator.run(&thread("", &["First part here. Second part here."])).await.unwrap();

        assert_eq!(narrator.backend().calls(), vec!["Title", "First part here.", "Second part here."]);
        let clip = summary.units[1].clip.as_ref().unwrap();
        assert_close(clip.duration_seconds, 2.0 + 2.0 + 0.3);
        assert_eq!(clip.chunk_count, 2);

        let leftovers = std::fs::read_dir(summary.audio_dir.parent().unwrap().join("tmp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_stereo_output_splices_censor_and_split_silence() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 50.0);
        cfg.output.channels = 2;
        cfg.censor.enabled = true;
        let mut backend = FakeBackend::new(2.0);
        backend.channels = 2;
        backend.max_chars = 20;
        let narrator = Narrator::new(cfg, backend).unwrap();

        let summary = narrator
            .run(&thread("", &["what the fuck man", "First part here. Second part here."]))
            .await
            .unwrap();

        let censored = summary.units[1].clip.as_ref().unwrap();
        assert_close(censored.duration_seconds, 2.0 + 2.0 + 0.35 + 4.0 * 0.02);
        let split = summary.units[2].clip.as_ref().unwrap();
        assert_close(split.duration_seconds, 2.0 + 2.0 + 0.3);

        for clip in [censored, split] {
            assert_eq!(hound::WavReader::open(&clip.path).unwrap().spec().channels, 2);
        }
        assert_close(summary.total_seconds, 2.0 + 4.43 + 4.3);
    }

    #[tokio::test]
    async fn test_failed_unit_counts_as_zero_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = Narrator::new(config(dir.path(), 50.0), FakeBackend::new(1.0)).unwrap();

        let summary = narrator.run(&thread("", &["@fail here", "fine"])).await.unwrap();

        assert!(summary.units[1].clip.is_none());
        assert!(summary.units[2].clip.is_some());
        assert_close(summary.total_seconds, 2.0);
        assert_eq!(summary.item_count, 2);
    }

    #[test]
    fn test_invalid_custom_word_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 50.0);
        cfg.censor.enabled = true;
        cfg.censor.custom_words = "two words".to_string();
        assert!(matches!(
            Narrator::new(cfg, FakeBackend::new(1.0)),
            Err(NarratorError::Configuration(_))
        ));
    }
}
