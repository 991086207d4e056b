//! Общие помощники для тестов: синтетические WAV и поддельные воркеры на sh

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{AttemptTier, VoiceConfig};
use crate::worker::WorkerLaunch;

/// Частота фрагментов у поддельного воркера
pub const FAKE_SAMPLE_RATE: u32 = 24000;

/// Длительность фрагмента, который отдаёт поддельный воркер (сек)
pub const FAKE_CHUNK_SECONDS: f64 = 0.5;

/// Записать синус 16 бит моно заданной длительности
pub fn write_tone(path: &Path, seconds: f64, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let samples = (seconds * sample_rate as f64).round() as u32;
    for i in 0..samples {
        let t = i as f64 / sample_rate as f64;
        let value = (t * 440.0 * 2.0 * std::f64::consts::PI).sin() * 8000.0;
        writer.write_sample(value as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Поведение поддельного воркера
///
/// Маркеры в тексте запроса управляют исходом: `@fail` даёт `ok:false`,
/// `@hang` зависает, `@die` завершает процесс, `@lie` сообщает об успехе
/// без файла.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeWorker {
    /// Готов на любом устройстве
    Healthy,
    /// Отказывает в готовности на всём, кроме `cpu`
    CpuOnly,
    /// Всегда сообщает `ready:false`
    NotReady,
    /// Печатает мусор вместо сообщения о готовности
    Garbage,
}

const ARG_PARSER: &str = r#"device=""
text=""
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --device) device="$2"; shift 2 ;;
    --text) text="$2"; shift 2 ;;
    --out) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

fn worker_script(kind: FakeWorker, fixture: &Path) -> String {
    let readiness = match kind {
        FakeWorker::Healthy => {
            r#"printf '{"ready": true, "device": "%s", "dtype": "x"}\n' "$device""#.to_string()
        }
        FakeWorker::CpuOnly => r#"if [ "$device" != "cpu" ]; then
  printf '%s\n' '{"ready": false, "error": "device unavailable"}'
  exit 1
fi
printf '%s\n' '{"ready": true, "device": "cpu", "dtype": "float32"}'"#
            .to_string(),
        FakeWorker::NotReady => r#"printf '%s\n' '{"ready": false, "error": "model failed to load"}'
exit 1"#
            .to_string(),
        FakeWorker::Garbage => "echo 'Loading weights...'\nsleep 5\nexit 1".to_string(),
    };

    format!(
        r#"{parser}{readiness}
while IFS= read -r line; do
  case "$line" in
    *'"cmd":"shutdown"'*) printf '%s\n' '{{"ok": true, "shutdown": true}}'; exit 0 ;;
    *@fail*) printf '%s\n' '{{"ok": false, "error": "synthetic failure"}}' ;;
    *@hang*) sleep 30 ;;
    *@die*) exit 3 ;;
    *@lie*) printf '%s\n' '{{"ok": true, "out": "/nonexistent/lie.wav"}}' ;;
    *)
      out=$(printf '%s\n' "$line" | sed -n 's/.*"out":"\([^"]*\)".*/\1/p')
      cp '{fixture}' "$out"
      printf '{{"ok": true, "out": "%s", "sr": 24000}}\n' "$out"
      ;;
  esac
done
"#,
        parser = ARG_PARSER,
        readiness = readiness,
        fixture = fixture.display()
    )
}

fn clone_script(fixture: &Path) -> String {
    format!(
        r#"{parser}case "$text" in
  *@fail*) echo "synthetic failure" >&2; exit 1 ;;
  *@hang*) exec sleep 30 ;;
  *@lie*) exit 0 ;;
esac
cp '{fixture}' "$out"
"#,
        parser = ARG_PARSER,
        fixture = fixture.display()
    )
}

/// Файл, который поддельные воркеры копируют в `out`
pub fn fake_fixture_path(dir: &Path) -> PathBuf {
    dir.join("fixture_chunk.wav")
}

/// Подготовить в `dir` фикстуру, образец голоса и скрипты воркеров
fn write_fake_assets(dir: &Path, kind: FakeWorker) -> (PathBuf, PathBuf, PathBuf, PathBuf) {
    let fixture = fake_fixture_path(dir);
    write_tone(&fixture, FAKE_CHUNK_SECONDS, FAKE_SAMPLE_RATE);

    let ref_audio = dir.join("ref.wav");
    write_tone(&ref_audio, 1.0, FAKE_SAMPLE_RATE);
    let ref_text = dir.join("ref.txt");
    std::fs::write(&ref_text, "Reference transcript.").unwrap();

    let worker = dir.join("fake_worker.sh");
    std::fs::write(&worker, worker_script(kind, &fixture)).unwrap();
    let clone = dir.join("fake_clone.sh");
    std::fs::write(&clone, clone_script(&fixture)).unwrap();

    (worker, clone, ref_audio, ref_text)
}

/// Параметры запуска поддельных воркеров через `/bin/sh`
pub fn fake_worker_launch(dir: &Path, kind: FakeWorker) -> WorkerLaunch {
    let (worker, clone, ref_audio, ref_text) = write_fake_assets(dir, kind);
    WorkerLaunch {
        program: PathBuf::from("/bin/sh"),
        worker_script: worker,
        clone_script: Some(clone),
        model: None,
        language: "English".to_string(),
        ref_audio,
        ref_text_file: ref_text,
        extra_path: None,
        startup_timeout: Duration::from_secs(10),
    }
}

/// Конфигурация голоса с поддельными воркерами и коротким каскадом
pub fn fake_voice_config(dir: &Path, kind: FakeWorker) -> VoiceConfig {
    let (worker, clone, ref_audio, ref_text) = write_fake_assets(dir, kind);
    VoiceConfig {
        program: PathBuf::from("/bin/sh"),
        worker_script: worker,
        clone_script: Some(clone),
        ref_audio,
        ref_text_file: ref_text,
        startup_timeout_seconds: 10,
        attempt_plan: vec![
            AttemptTier::new("cuda:0", "bfloat16", 220, 10),
            AttemptTier::new("cuda:0", "float16", 180, 10),
            AttemptTier::new("cpu", "float32", 180, 10),
        ],
        ..VoiceConfig::default()
    }
}
