//! Модуль для обработки аудиофайлов
//!
//! WAV читается и пишется напрямую через `hound`; остальные форматы
//! обрабатываются через FFmpeg.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::config::{AudioContainer, OutputFormat};
use crate::error::{NarratorError, Result};
use crate::utils::ffmpeg::{check_ffprobe_installed, run_ffmpeg_command, run_ffprobe_command};
use crate::utils::temp::TempFileManager;

/// Минимальная длительность генерируемой тишины (сек)
pub const MIN_SILENCE_SECONDS: f64 = 0.12;

/// Является ли файл WAV (по расширению)
pub fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| NarratorError::AudioProcessing(format!("Non UTF-8 path: {}", path.display())))
}

/// Длительность WAV-файла по заголовку
pub fn wav_duration(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(NarratorError::AudioProcessing(format!(
            "Zero sample rate in {}",
            path.display()
        )));
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Получение длительности аудиофайла
pub async fn probe_duration(path: &Path) -> Result<f64> {
    if !path.exists() {
        return Err(NarratorError::FileNotFound(path.display().to_string()));
    }
    if is_wav(path) {
        return wav_duration(path);
    }
    if !check_ffprobe_installed() {
        return Err(NarratorError::AudioProcessing(
            "ffprobe is required to measure non-WAV clips".to_string(),
        ));
    }

    let output = run_ffprobe_command(&[
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
        path_str(path)?,
    ])
    .await?;

    let duration = output.trim().parse::<f64>().map_err(|_| {
        NarratorError::AudioProcessing(format!("Failed to parse audio duration: {}", output.trim()))
    })?;

    Ok(duration)
}

/// Запись тишины заданной длительности
pub async fn write_silence(path: &Path, seconds: f64, sample_rate: u32, channels: u16) -> Result<()> {
    let seconds = seconds.max(MIN_SILENCE_SECONDS);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if is_wav(path) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        return write_wav_silence(path, seconds, spec);
    }

    let source = format!("anullsrc=r={}:cl=mono", sample_rate);
    let duration = format!("{:.3}", seconds);
    let channels = channels.to_string();
    let mut args = vec![
        "-f",
        "lavfi",
        "-i",
        source.as_str(),
        "-t",
        duration.as_str(),
        "-ac",
        channels.as_str(),
    ];
    if path_has_container(path, AudioContainer::Mp3) {
        args.extend(["-q:a", "9", "-acodec", "libmp3lame"]);
    }
    args.push(path_str(path)?);

    run_ffmpeg_command(&args).await
}

/// Тишина в том же WAV-формате, что и `template`, чтобы её можно было
/// склеить с ним без перекодирования
pub fn write_silence_like(path: &Path, seconds: f64, template: &Path) -> Result<()> {
    let spec = WavReader::open(template)?.spec();
    write_wav_silence(path, seconds.max(MIN_SILENCE_SECONDS), spec)
}

fn write_wav_silence(path: &Path, seconds: f64, spec: WavSpec) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let samples = (seconds * spec.sample_rate as f64).round() as u64 * spec.channels as u64;
    let mut writer = WavWriter::create(path, spec)?;
    for _ in 0..samples {
        match spec.sample_format {
            SampleFormat::Int => writer.write_sample(0i32)?,
            SampleFormat::Float => writer.write_sample(0.0f32)?,
        }
    }
    writer.finalize()?;
    Ok(())
}

fn path_has_container(path: &Path, container: AudioContainer) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(container.extension()))
        .unwrap_or(false)
}

/// Общий формат всех WAV-входов, если он совпадает
fn common_wav_spec(inputs: &[PathBuf]) -> Option<WavSpec> {
    let mut common: Option<WavSpec> = None;
    for input in inputs {
        if !is_wav(input) {
            return None;
        }
        let spec = WavReader::open(input).ok()?.spec();
        match common {
            None => common = Some(spec),
            Some(existing) if existing == spec => {}
            Some(_) => return None,
        }
    }
    common
}

fn concat_wav_natively(inputs: &[PathBuf], output: &Path, spec: WavSpec) -> Result<()> {
    let mut writer = WavWriter::create(output, spec)?;
    for input in inputs {
        let mut reader = WavReader::open(input)?;
        match spec.sample_format {
            SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer.write_sample(sample?)?;
                }
            }
            SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample?)?;
                }
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Объединение аудиофайлов в заданном порядке
pub async fn concat_clips(inputs: &[PathBuf], output: &Path, scratch: &mut TempFileManager) -> Result<()> {
    if inputs.is_empty() {
        return Err(NarratorError::AudioProcessing("Nothing to concatenate".to_string()));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if is_wav(output) {
        if let Some(spec) = common_wav_spec(inputs) {
            return concat_wav_natively(inputs, output, spec);
        }
    }

    // Создаем файл со списком входных файлов для FFmpeg
    let list_path = scratch.unique_path("concat_list", "txt");
    {
        let mut list = BufWriter::new(File::create(&list_path)?);
        for input in inputs {
            let absolute = std::path::absolute(input)?;
            let escaped = absolute.to_string_lossy().replace('\'', "'\\''");
            writeln!(list, "file '{}'", escaped)?;
        }
        list.flush()?;
    }

    let mut args = vec!["-f", "concat", "-safe", "0", "-i", path_str(&list_path)?];
    if path_has_container(output, AudioContainer::Mp3) {
        args.extend(["-c:a", "libmp3lame", "-q:a", "4"]);
    } else {
        args.extend(["-c", "copy"]);
    }
    args.push(path_str(output)?);

    run_ffmpeg_command(&args).await
}

/// Перекодирование в итоговый формат
pub async fn transcode(input: &Path, output: &Path, format: &OutputFormat) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if is_wav(input) && format.container == AudioContainer::Wav {
        let spec = WavReader::open(input)?.spec();
        if spec.sample_rate == format.sample_rate && spec.channels == format.channels {
            tokio::fs::copy(input, output).await?;
            return Ok(());
        }
    }

    let rate = format.sample_rate.to_string();
    let channels = format.channels.to_string();
    let mut args = vec!["-i", path_str(input)?, "-ar", rate.as_str(), "-ac", channels.as_str()];
    if format.container == AudioContainer::Mp3 {
        args.extend(["-b:a", format.bitrate.as_str()]);
    }
    args.push(path_str(output)?);

    run_ffmpeg_command(&args).await
}
