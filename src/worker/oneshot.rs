//! Разовый запуск CLI синтеза: один процесс на фрагмент
//!
//! Используется для попыток с `pooled = false` и когда постоянные
//! воркеры отключены в конфигурации. Модель загружается заново на
//! каждый вызов, поэтому этот путь заметно медленнее пула.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::time::timeout;

use super::pool::WorkerLaunch;
use super::{WorkerError, WorkerKey};
use crate::utils::temp::remove_file_quietly;

/// Синтезировать `text` в `out` отдельным процессом.
/// Старый файл `out` удаляется до запуска, при любой ошибке тоже.
pub async fn run_oneshot(
    launch: &WorkerLaunch,
    key: &WorkerKey,
    text: &str,
    language: &str,
    out: &Path,
    max_new_tokens: u32,
    deadline: Duration,
) -> Result<(), WorkerError> {
    remove_file_quietly(out);
    let result = run(launch, key, text, language, out, max_new_tokens, deadline).await;
    if result.is_err() {
        remove_file_quietly(out);
    }
    result
}

async fn run(
    launch: &WorkerLaunch,
    key: &WorkerKey,
    text: &str,
    language: &str,
    out: &Path,
    max_new_tokens: u32,
    deadline: Duration,
) -> Result<(), WorkerError> {
    let script = launch.clone_script.as_ref().ok_or_else(|| WorkerError::Spawn {
        key: key.clone(),
        source: io::Error::new(io::ErrorKind::NotFound, "no one-shot clone script configured"),
    })?;

    let mut cmd = launch.base_command(script);
    cmd.arg("--text")
        .arg(text)
        .arg("--language")
        .arg(language)
        .arg("--ref-audio")
        .arg(&launch.ref_audio)
        .arg("--ref-text-file")
        .arg(&launch.ref_text_file)
        .arg("--max-new-tokens")
        .arg(max_new_tokens.to_string())
        .arg("--out")
        .arg(out)
        .arg("--device")
        .arg(&key.device)
        .arg("--dtype")
        .arg(&key.precision);
    if let Some(model) = &launch.model {
        cmd.arg("--model").arg(model);
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    log::debug!("Running one-shot synthesis on {} ({} chars)", key, text.chars().count());

    let child = cmd.spawn().map_err(|source| WorkerError::Spawn {
        key: key.clone(),
        source,
    })?;

    // kill_on_drop завершит процесс, если таймаут бросит future
    let output = match timeout(deadline, child.wait_with_output()).await {
        Err(_) => {
            return Err(WorkerError::Timeout {
                key: key.clone(),
                after: deadline,
            })
        }
        Ok(result) => result?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let detail = tail.into_iter().rev().collect::<Vec<_>>().join(" | ");
        return Err(WorkerError::Rejected {
            key: key.clone(),
            error: format!("exit status {}: {}", output.status, detail),
        });
    }

    let valid = std::fs::metadata(out).map(|m| m.is_file() && m.len() > 0).unwrap_or(false);
    if !valid {
        return Err(WorkerError::MissingOutput {
            key: key.clone(),
            path: out.to_path_buf(),
        });
    }
    Ok(())
}
