//! Модуль для работы с FFmpeg
//!
//! Все вызовы асинхронные: процесс запускается через `tokio::process`.

use std::process::Stdio;

use tokio::process::Command;

use crate::error::{NarratorError, Result};

/// Проверка наличия FFmpeg в PATH
pub fn check_ffmpeg_installed() -> bool {
    which::which("ffmpeg").is_ok()
}

/// Проверка наличия FFprobe в PATH
pub fn check_ffprobe_installed() -> bool {
    which::which("ffprobe").is_ok()
}

/// Запуск команды FFmpeg
pub async fn run_ffmpeg_command(args: &[&str]) -> Result<()> {
    log::debug!("ffmpeg {}", args.join(" "));
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(NarratorError::AudioProcessing(format!(
            "FFmpeg command failed with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

/// Запуск команды FFprobe
pub async fn run_ffprobe_command(args: &[&str]) -> Result<String> {
    let output = Command::new("ffprobe")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(NarratorError::AudioProcessing(format!(
            "FFprobe command failed with status: {}",
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
