//! Пул постоянных воркеров инференса
//!
//! Воркер запускается лениво при первом обращении к паре (устройство,
//! точность), проходит рукопожатие и дальше переиспользуется до конца
//! запуска. Живость проверяется только перед запросом через `try_wait`.
//! На одном процессе одновременно выполняется не больше одного запроса:
//! это гарантирует `&mut` доступ к воркеру.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

use super::protocol::{decode_line, encode_line, ControlCommand, ReadyMessage, SynthesisRequest, WorkerResponse};
use super::{WorkerError, WorkerKey};
use crate::config::VoiceConfig;
use crate::utils::temp::remove_file_quietly;

/// Сколько ждать подтверждения остановки
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Параметры запуска процессов инференса
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub worker_script: PathBuf,
    pub clone_script: Option<PathBuf>,
    pub model: Option<String>,
    pub language: String,
    pub ref_audio: PathBuf,
    pub ref_text_file: PathBuf,
    pub extra_path: Option<PathBuf>,
    pub startup_timeout: Duration,
}

impl WorkerLaunch {
    pub fn from_config(voice: &VoiceConfig) -> Self {
        Self {
            program: voice.program.clone(),
            worker_script: voice.worker_script.clone(),
            clone_script: voice.clone_script.clone(),
            model: voice.model.clone(),
            language: voice.language.clone(),
            ref_audio: voice.ref_audio.clone(),
            ref_text_file: voice.ref_text_file.clone(),
            extra_path: voice.extra_path.clone(),
            startup_timeout: voice.startup_timeout(),
        }
    }

    /// Базовая команда: интерпретатор, скрипт и окружение
    pub(crate) fn base_command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(script);
        cmd.env("PYTHONUTF8", "1");
        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn search_path(&self) -> Option<OsString> {
        let extra = self.extra_path.as_ref()?;
        let current = std::env::var_os("PATH").unwrap_or_default();
        let paths = std::iter::once(extra.clone()).chain(std::env::split_paths(&current));
        std::env::join_paths(paths).ok()
    }

    fn worker_command(&self, key: &WorkerKey) -> Command {
        let mut cmd = self.base_command(&self.worker_script);
        cmd.arg("--device")
            .arg(&key.device)
            .arg("--dtype")
            .arg(&key.precision)
            .arg("--language")
            .arg(&self.language)
            .arg("--ref-audio")
            .arg(&self.ref_audio)
            .arg("--ref-text-file")
            .arg(&self.ref_text_file);
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd
    }
}

/// Состояние процесса воркера
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Busy,
    Dead,
}

/// Один постоянный процесс инференса
pub struct Worker {
    key: WorkerKey,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    state: WorkerState,
    served: usize,
}

impl Worker {
    /// Запустить процесс и дождаться сообщения о готовности
    pub async fn spawn(launch: &WorkerLaunch, key: &WorkerKey) -> Result<Self, WorkerError> {
        log::info!("Starting TTS worker {}", key);

        let mut child = launch
            .worker_command(key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                key: key.clone(),
                source,
            })?;

        // Модель пишет в stderr много; читаем, чтобы не переполнить канал
        if let Some(stderr) = child.stderr.take() {
            let label = key.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("worker {}: {}", label, line);
                }
            });
        }

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill().await;
                return Err(WorkerError::Handshake {
                    key: key.clone(),
                    reason: "worker stdio is not piped".to_string(),
                });
            }
        };

        let mut worker = Self {
            key: key.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            state: WorkerState::Starting,
            served: 0,
        };

        match worker.await_ready(launch.startup_timeout).await {
            Ok(ready) => {
                log::info!(
                    "TTS worker {} ready (device {}, precision {})",
                    key,
                    ready.device.as_deref().unwrap_or("?"),
                    ready.precision.as_deref().unwrap_or("?")
                );
                worker.state = WorkerState::Ready;
                Ok(worker)
            }
            Err(e) => {
                worker.kill().await;
                Err(e)
            }
        }
    }

    async fn await_ready(&mut self, startup_timeout: Duration) -> Result<ReadyMessage, WorkerError> {
        let handshake = |reason: String| WorkerError::Handshake {
            key: self.key.clone(),
            reason,
        };

        let line = match timeout(startup_timeout, self.stdout.next_line()).await {
            Err(_) => return Err(handshake(format!("no ready message within {:?}", startup_timeout))),
            Ok(Err(e)) => return Err(handshake(e.to_string())),
            Ok(Ok(None)) => return Err(handshake("exited before ready message".to_string())),
            Ok(Ok(Some(line))) => line,
        };

        let ready: ReadyMessage = decode_line(&line).map_err(|e| handshake(e.to_string()))?;
        if !ready.ready {
            let reason = ready.error.clone().unwrap_or_else(|| "worker reported not ready".to_string());
            return Err(handshake(reason));
        }
        Ok(ready)
    }

    pub fn key(&self) -> &WorkerKey {
        &self.key
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Сколько запросов выполнено этим процессом
    pub fn served(&self) -> usize {
        self.served
    }

    /// Процесс жив и готов принять запрос
    pub fn is_alive(&mut self) -> bool {
        if self.state == WorkerState::Dead {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::warn!("TTS worker {} exited with {}", self.key, status);
                self.state = WorkerState::Dead;
                false
            }
            Err(e) => {
                log::warn!("Failed to poll TTS worker {}: {}", self.key, e);
                self.state = WorkerState::Dead;
                false
            }
        }
    }

    /// Записать запрос и прочитать ровно одну строку ответа.
    /// При таймауте или обрыве процесс убивается: ответ мог бы прийти позже
    /// и рассинхронизировать протокол.
    pub async fn request(&mut self, request: &SynthesisRequest, deadline: Duration) -> Result<WorkerResponse, WorkerError> {
        let line = encode_line(request)?;
        self.state = WorkerState::Busy;

        let exchange = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await?;
            self.stdout.next_line().await
        };

        let exchanged = timeout(deadline, exchange).await;
        let result = match exchanged {
            Err(_) => Err(WorkerError::Timeout {
                key: self.key.clone(),
                after: deadline,
            }),
            Ok(Err(e)) => Err(WorkerError::Dead {
                key: self.key.clone(),
                detail: e.to_string(),
            }),
            Ok(Ok(None)) => Err(WorkerError::Dead {
                key: self.key.clone(),
                detail: "stdout closed".to_string(),
            }),
            Ok(Ok(Some(line))) => decode_line::<WorkerResponse>(&line),
        };

        match result {
            Ok(response) => {
                self.state = WorkerState::Ready;
                self.served += 1;
                Ok(response)
            }
            Err(e) => {
                self.kill().await;
                Err(e)
            }
        }
    }

    /// Попросить воркер завершиться и дождаться выхода; упрямый процесс убить
    pub async fn shutdown(&mut self) {
        if !self.is_alive() {
            return;
        }

        let sent = match encode_line(&ControlCommand::Shutdown) {
            Ok(line) => self.stdin.write_all(line.as_bytes()).await.is_ok() && self.stdin.flush().await.is_ok(),
            Err(_) => false,
        };

        if sent {
            match timeout(SHUTDOWN_GRACE, self.stdout.next_line()).await {
                Ok(Ok(Some(line))) => match decode_line::<WorkerResponse>(&line) {
                    Ok(ack) if ack.ok && ack.shutdown => log::debug!("TTS worker {} acknowledged shutdown", self.key),
                    _ => log::warn!("TTS worker {} sent unexpected shutdown reply: {}", self.key, line),
                },
                _ => log::warn!("TTS worker {} did not acknowledge shutdown", self.key),
            }

            if let Ok(Ok(status)) = timeout(SHUTDOWN_GRACE, self.child.wait()).await {
                log::debug!("TTS worker {} exited with {}", self.key, status);
                self.state = WorkerState::Dead;
                return;
            }
        }

        self.kill().await;
    }

    /// Убить процесс; ошибки игнорируются
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            log::debug!("Failed to kill TTS worker {}: {}", self.key, e);
        }
        self.state = WorkerState::Dead;
    }
}

/// Пул воркеров по ключу (устройство, точность)
pub struct WorkerPool {
    launch: WorkerLaunch,
    workers: HashMap<WorkerKey, Worker>,
    startups: usize,
}

impl WorkerPool {
    pub fn new(launch: WorkerLaunch) -> Self {
        Self {
            launch,
            workers: HashMap::new(),
            startups: 0,
        }
    }

    /// Сколько раз запускался процесс воркера
    pub fn startups(&self) -> usize {
        self.startups
    }

    /// Сколько воркеров сейчас в пуле
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Получить готовый воркер; мёртвый заменяется новым
    pub async fn acquire(&mut self, key: &WorkerKey) -> Result<&mut Worker, WorkerError> {
        let reusable = match self.workers.get_mut(key) {
            Some(worker) => worker.is_alive() && worker.state() == WorkerState::Ready,
            None => false,
        };

        if !reusable {
            if let Some(mut stale) = self.workers.remove(key) {
                log::warn!("Purging dead TTS worker {}", key);
                stale.kill().await;
            }
            let worker = Worker::spawn(&self.launch, key).await?;
            self.startups += 1;
            self.workers.insert(key.clone(), worker);
        }

        self.workers.get_mut(key).ok_or_else(|| WorkerError::Dead {
            key: key.clone(),
            detail: "worker vanished from pool".to_string(),
        })
    }

    /// Вернуть воркер в пул; мёртвый удаляется
    pub async fn release(&mut self, key: &WorkerKey) {
        let dead = match self.workers.get_mut(key) {
            Some(worker) => !worker.is_alive(),
            None => false,
        };
        if dead {
            self.retire(key).await;
        }
    }

    /// Удалить воркер из пула и убить процесс
    pub async fn retire(&mut self, key: &WorkerKey) {
        if let Some(mut worker) = self.workers.remove(key) {
            log::debug!("Retiring TTS worker {} after {} requests", key, worker.served());
            worker.kill().await;
        }
    }

    /// Синтезировать один фрагмент на воркере `key`.
    /// `Ok` гарантирует, что файл `request.out` создан этим запросом и не пуст;
    /// при любой ошибке файл по этому пути удаляется.
    pub async fn submit(
        &mut self,
        key: &WorkerKey,
        request: &SynthesisRequest,
        deadline: Duration,
    ) -> Result<WorkerResponse, WorkerError> {
        remove_file_quietly(&request.out);
        let result = match self.acquire(key).await {
            Ok(worker) => worker.request(request, deadline).await,
            Err(e) => Err(e),
        };
        self.release(key).await;

        let outcome = match result {
            Ok(response) if response.ok => {
                if output_is_valid(&request.out) {
                    Ok(response)
                } else {
                    Err(WorkerError::MissingOutput {
                        key: key.clone(),
                        path: request.out.clone(),
                    })
                }
            }
            Ok(response) => Err(WorkerError::Rejected {
                key: key.clone(),
                error: response.error.unwrap_or_else(|| "no error message".to_string()),
            }),
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            remove_file_quietly(&request.out);
        }
        outcome
    }

    /// Остановить все воркеры
    pub async fn shutdown_all(&mut self) {
        for (key, mut worker) in self.workers.drain() {
            log::debug!("Shutting down TTS worker {}", key);
            worker.shutdown().await;
        }
    }
}

fn output_is_valid(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
