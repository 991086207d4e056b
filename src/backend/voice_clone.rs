//! Синтез с клонированием голоса через внешний процесс инференса
//!
//! Текст режется на фрагменты, каждый фрагмент прогоняется по каскаду
//! попыток, результаты склеиваются и перекодируются в итоговый формат.
//! Фрагмент, для которого все попытки провалились, заменяется тишиной.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::SynthesisBackend;
use crate::config::{AttemptTier, OutputFormat, VoiceConfig};
use crate::error::{NarratorError, Result};
use crate::media::audio::{concat_clips, transcode, write_silence, write_silence_like};
use crate::media::{ClipStatus, GeneratedClip};
use crate::text::{normalize_whitespace, segment, Chunk};
use crate::utils::temp::TempFileManager;
use crate::worker::{run_oneshot, SynthesisRequest, WorkerError, WorkerKey, WorkerLaunch, WorkerPool};

struct PoolState {
    pool: WorkerPool,
    /// Ключи, чей воркер не прошёл запуск; до конца запуска не пробуем
    unusable: HashSet<WorkerKey>,
}

/// Бэкенд клонирования голоса
pub struct VoiceCloneBackend {
    voice: VoiceConfig,
    output: OutputFormat,
    launch: WorkerLaunch,
    scratch_root: PathBuf,
    state: Mutex<PoolState>,
}

impl VoiceCloneBackend {
    /// Создать бэкенд; отсутствующие файлы образца или скриптов считаются
    /// ошибкой конфигурации
    pub fn new(voice: VoiceConfig, output: OutputFormat, scratch_root: impl Into<PathBuf>) -> Result<Self> {
        if voice.attempt_plan.is_empty() {
            return Err(config_error("attempt plan is empty".to_string()));
        }
        require_file(&voice.ref_audio, "reference audio")?;
        require_file(&voice.ref_text_file, "reference transcript")?;

        let needs_pool = voice.persistent && voice.attempt_plan.iter().any(|tier| tier.pooled);
        let needs_oneshot = !voice.persistent || voice.attempt_plan.iter().any(|tier| !tier.pooled);
        if needs_pool {
            require_file(&voice.worker_script, "worker script")?;
        }
        if needs_oneshot {
            match &voice.clone_script {
                Some(script) => require_file(script, "clone script")?,
                None => return Err(config_error("clone_script is required for non-pooled attempts".to_string())),
            }
        }

        let launch = WorkerLaunch::from_config(&voice);
        Ok(Self {
            output,
            launch: launch.clone(),
            scratch_root: scratch_root.into(),
            state: Mutex::new(PoolState {
                pool: WorkerPool::new(launch),
                unusable: HashSet::new(),
            }),
            voice,
        })
    }

    /// Сколько раз запускались постоянные воркеры
    pub async fn worker_startups(&self) -> usize {
        self.state.lock().await.pool.startups()
    }

    /// Синтезировать один фрагмент, перебирая ступени каскада.
    /// `None`, если все ступени провалились; иначе частота, которую сообщил воркер.
    async fn synthesize_chunk(&self, chunk: &Chunk, out: &Path) -> Option<Option<u32>> {
        for (attempt, tier) in self.voice.attempt_plan.iter().enumerate() {
            let key = WorkerKey::new(tier.device.as_str(), tier.precision.as_str());
            let pooled = self.voice.persistent && tier.pooled;

            let result = if pooled {
                self.attempt_pooled(&key, tier, chunk, out).await
            } else {
                run_oneshot(
                    &self.launch,
                    &key,
                    &chunk.text,
                    &self.voice.language,
                    out,
                    tier.max_tokens,
                    tier.timeout(),
                )
                .await
                .map(|()| None)
            };

            match result {
                Ok(sample_rate) => {
                    log::debug!("Chunk {} synthesized on {} (attempt {})", chunk.index, key, attempt + 1);
                    return Some(sample_rate);
                }
                Err(e) => log::warn!("Chunk {} attempt {} on {} failed: {}", chunk.index, attempt + 1, key, e),
            }
        }
        None
    }

    async fn write_failure_silence(&self, part: &Path, template: Option<&Path>, reported_rate: Option<u32>) -> Result<()> {
        let seconds = self.voice.failure_silence_seconds;
        if let Some(template) = template {
            match write_silence_like(part, seconds, template) {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("Cannot copy format of {}: {}", template.display(), e),
            }
        }
        let sample_rate = reported_rate.unwrap_or(self.voice.chunk_sample_rate);
        write_silence(part, seconds, sample_rate, 1).await
    }

    async fn attempt_pooled(
        &self,
        key: &WorkerKey,
        tier: &AttemptTier,
        chunk: &Chunk,
        out: &Path,
    ) -> std::result::Result<Option<u32>, WorkerError> {
        let mut state = self.state.lock().await;
        if state.unusable.contains(key) {
            return Err(WorkerError::Handshake {
                key: key.clone(),
                reason: "worker already failed to start in this run".to_string(),
            });
        }

        let request = SynthesisRequest {
            text: chunk.text.clone(),
            out: out.to_path_buf(),
            language: self.voice.language.clone(),
            max_new_tokens: tier.max_tokens,
        };

        match state.pool.submit(key, &request, tier.timeout()).await {
            Ok(response) => Ok(response.sample_rate),
            Err(e) => {
                if matches!(e, WorkerError::Spawn { .. } | WorkerError::Handshake { .. }) {
                    state.unusable.insert(key.clone());
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SynthesisBackend for VoiceCloneBackend {
    async fn synthesize(&self, text: &str, dest: &Path) -> Result<GeneratedClip> {
        let text = normalize_whitespace(text);
        let mut scratch = TempFileManager::new_in(&self.scratch_root)?;

        let mut parts = Vec::new();
        let mut failed = Vec::new();
        let mut template: Option<PathBuf> = None;
        let mut reported_rate = None;
        for chunk in segment(&text, self.voice.max_chunk_chars) {
            let part = scratch.named_path(&format!("part_{:02}.wav", chunk.index));
            match self.synthesize_chunk(&chunk, &part).await {
                Some(sample_rate) => {
                    reported_rate = reported_rate.or(sample_rate);
                    template.get_or_insert_with(|| part.clone());
                }
                None => {
                    log::warn!(
                        "All attempts failed for chunk {}, substituting {:.2}s of silence",
                        chunk.index,
                        self.voice.failure_silence_seconds
                    );
                    failed.push(part.clone());
                }
            }
            parts.push(part);
        }

        // Тишина должна совпадать по формату с тем, что отдала модель
        for part in &failed {
            self.write_failure_silence(part, template.as_deref(), reported_rate).await?;
        }
        let failed_chunks = failed.len();

        let merged = scratch.named_path("merged.wav");
        concat_clips(&parts, &merged, &mut scratch).await?;
        transcode(&merged, dest, &self.output).await?;

        let status = if failed_chunks == 0 {
            ClipStatus::Ok
        } else {
            ClipStatus::Degraded { failed_chunks }
        };
        let clip = GeneratedClip::probe(dest).await?.with_status(status, parts.len());
        log::info!(
            "Synthesized {} ({} chunks, {:.2}s{})",
            dest.display(),
            clip.chunk_count,
            clip.duration_seconds,
            if failed_chunks > 0 { ", degraded" } else { "" }
        );
        Ok(clip)
    }

    fn max_chars(&self) -> usize {
        self.voice.max_call_chars
    }

    async fn shutdown(&self) {
        self.state.lock().await.pool.shutdown_all().await;
    }
}

fn config_error(message: String) -> NarratorError {
    log::error!("{}", message);
    NarratorError::Configuration(message)
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(config_error(format!("{} not found: {}", what, path.display())))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::AudioContainer;
    use crate::test_support::{
        fake_fixture_path, fake_voice_config, write_tone, FakeWorker, FAKE_CHUNK_SECONDS, FAKE_SAMPLE_RATE,
    };

    fn wav_output() -> OutputFormat {
        OutputFormat {
            container: AudioContainer::Wav,
            sample_rate: FAKE_SAMPLE_RATE,
            channels: 1,
            ..OutputFormat::default()
        }
    }

    #[tokio::test]
    async fn test_single_chunk_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        let backend = VoiceCloneBackend::new(voice, wav_output(), dir.path().join("scratch")).unwrap();

        let dest = dir.path().join("out").join("title.wav");
        let clip = backend.synthesize("Hello world. This is a test.", &dest).await.unwrap();

        assert_eq!(clip.status, ClipStatus::Ok);
        assert_eq!(clip.chunk_count, 1);
        assert!((clip.duration_seconds - FAKE_CHUNK_SECONDS).abs() < 1e-3);
        assert!(dest.exists());
        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_started_once_for_many_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        voice.max_chunk_chars = 20;
        let backend = VoiceCloneBackend::new(voice, wav_output(), dir.path().join("scratch")).unwrap();

        let dest = dir.path().join("long.wav");
        let clip = backend
            .synthesize("First line here. Second line here. Third one.", &dest)
            .await
            .unwrap();

        assert_eq!(clip.chunk_count, 3);
        assert!((clip.duration_seconds - 3.0 * FAKE_CHUNK_SECONDS).abs() < 1e-3);
        assert_eq!(backend.worker_startups().await, 1);
        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_falls_through_to_cpu_tier() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::CpuOnly);
        voice.max_chunk_chars = 20;
        let backend = VoiceCloneBackend::new(voice, wav_output(), dir.path().join("scratch")).unwrap();

        let clip = backend
            .synthesize("One short line. Another short line.", &dir.path().join("cpu.wav"))
            .await
            .unwrap();

        assert_eq!(clip.status, ClipStatus::Ok);
        assert_eq!(clip.chunk_count, 2);
        // GPU-воркеры не стартовали и больше не пробуются
        assert_eq!(backend.worker_startups().await, 1);
        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_plan_degrades_to_silence() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        voice.program = dir.path().join("missing-python");
        let backend = VoiceCloneBackend::new(voice, wav_output(), dir.path().join("scratch")).unwrap();

        let clip = backend.synthesize("Nobody will say this.", &dir.path().join("silent.wav")).await.unwrap();

        assert_eq!(clip.status, ClipStatus::Degraded { failed_chunks: 1 });
        assert!((clip.duration_seconds - 0.4).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_rejected_chunk_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        voice.max_chunk_chars = 20;
        let backend = VoiceCloneBackend::new(voice, wav_output(), dir.path().join("scratch")).unwrap();

        let clip = backend
            .synthesize("Good chunk here. Then @fail chunk. Good again.", &dir.path().join("mixed.wav"))
            .await
            .unwrap();

        assert_eq!(clip.chunk_count, 3);
        assert_eq!(clip.status, ClipStatus::Degraded { failed_chunks: 1 });
        assert!((clip.duration_seconds - (2.0 * FAKE_CHUNK_SECONDS + 0.4)).abs() < 1e-3);
        // Отказ не роняет воркер, но каждая следующая ступень поднимает свой
        assert_eq!(backend.worker_startups().await, 3);
        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_silence_follows_model_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        voice.max_chunk_chars = 20;
        // Модель отдаёт 22050 Гц, а не частоту из конфигурации
        write_tone(&fake_fixture_path(dir.path()), FAKE_CHUNK_SECONDS, 22050);
        let output = OutputFormat {
            sample_rate: 22050,
            ..wav_output()
        };
        let backend = VoiceCloneBackend::new(voice, output, dir.path().join("scratch")).unwrap();

        let dest = dir.path().join("resampled.wav");
        let clip = backend
            .synthesize("@fail chunk first. Good chunk here.", &dest)
            .await
            .unwrap();

        assert_eq!(clip.chunk_count, 2);
        assert_eq!(clip.status, ClipStatus::Degraded { failed_chunks: 1 });
        assert!((clip.duration_seconds - (FAKE_CHUNK_SECONDS + 0.4)).abs() < 1e-3);
        assert_eq!(hound::WavReader::open(&dest).unwrap().spec().sample_rate, 22050);
        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_persistent_uses_clone_cli() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        voice.persistent = false;
        let backend = VoiceCloneBackend::new(voice, wav_output(), dir.path().join("scratch")).unwrap();

        let clip = backend.synthesize("Just once.", &dir.path().join("once.wav")).await.unwrap();
        assert_eq!(clip.status, ClipStatus::Ok);
        assert_eq!(backend.worker_startups().await, 0);
    }

    #[tokio::test]
    async fn test_scratch_files_removed_after_call() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        let backend = VoiceCloneBackend::new(voice, wav_output(), &scratch).unwrap();

        backend.synthesize("Clean up after me.", &dir.path().join("c.wav")).await.unwrap();
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
        backend.shutdown().await;
    }

    #[test]
    fn test_missing_reference_audio_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        voice.ref_audio = dir.path().join("nope.wav");

        let err = VoiceCloneBackend::new(voice, wav_output(), dir.path()).err().unwrap();
        assert!(matches!(err, NarratorError::Configuration(_)));
    }

    #[test]
    fn test_non_pooled_tier_requires_clone_script() {
        let dir = tempfile::tempdir().unwrap();
        let mut voice = fake_voice_config(dir.path(), FakeWorker::Healthy);
        voice.clone_script = None;
        voice.attempt_plan[2].pooled = false;

        let err = VoiceCloneBackend::new(voice, wav_output(), dir.path()).err().unwrap();
        assert!(matches!(err, NarratorError::Configuration(_)));
    }
}
