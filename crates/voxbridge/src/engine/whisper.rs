//! whisper.cpp backend, enabled with the `whisper` feature.
//!
//! Inputs are normalized to 16 kHz mono PCM with the system `ffmpeg`
//! before inference; whisper.cpp accepts nothing else.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::EngineError;
use crate::job::ModelKind;

use super::{LoadedModel, ModelBackend};

const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Backend loading ggml model files from a local directory.
pub struct WhisperBackend {
    model_dir: PathBuf,
}

impl WhisperBackend {
    pub fn new(model_dir: PathBuf) -> Self {
        Self { model_dir }
    }

    /// Path of the ggml file for a model size, `ggml-base.bin` style.
    pub fn model_path(&self, model: ModelKind) -> PathBuf {
        self.model_dir.join(format!("ggml-{}.bin", model))
    }
}

impl ModelBackend for WhisperBackend {
    fn load(&self, model: ModelKind) -> Result<Box<dyn LoadedModel>, EngineError> {
        let path = self.model_path(model);
        if !path.exists() {
            return Err(EngineError::ModelLoad {
                model: model.to_string(),
                reason: format!("model file not found: {}", path.display()),
            });
        }

        let path_str = path.to_str().ok_or_else(|| EngineError::ModelLoad {
            model: model.to_string(),
            reason: "model path is not valid UTF-8".to_string(),
        })?;

        info!("Loading whisper model from {}", path.display());
        let context = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| EngineError::ModelLoad {
                model: model.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(WhisperModel { context }))
    }
}

struct WhisperModel {
    context: WhisperContext,
}

impl LoadedModel for WhisperModel {
    fn transcribe(
        &mut self,
        audio: &Path,
        language: Option<&str>,
    ) -> Result<String, EngineError> {
        let samples = load_samples(audio)?;

        let file = audio.display().to_string();
        let err = |reason: String| EngineError::Transcription {
            file: file.clone(),
            reason,
        };

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(language);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        let mut state = self
            .context
            .create_state()
            .map_err(|e| err(format!("failed to create state: {}", e)))?;

        state
            .full(params, &samples)
            .map_err(|e| err(format!("inference failed: {}", e)))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| err(format!("failed to read segments: {}", e)))?;

        let mut text = String::new();
        for i in 0..num_segments {
            let segment = state
                .full_get_segment_text(i)
                .map_err(|e| err(format!("failed to read segment {}: {}", i, e)))?;
            text.push_str(&segment);
        }

        Ok(text.trim().to_string())
    }
}

/// Decodes any supported input into 16 kHz mono f32 samples by piping it
/// through `ffmpeg` into a temporary WAV file.
fn load_samples(audio: &Path) -> Result<Vec<f32>, EngineError> {
    let file = audio.display().to_string();
    let err = |reason: String| EngineError::Transcription {
        file: file.clone(),
        reason,
    };

    let tmp = tempfile::Builder::new()
        .suffix(".wav")
        .tempfile()
        .map_err(|e| err(format!("failed to create temp file: {}", e)))?;

    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(audio)
        .args(["-ar", "16000", "-ac", "1", "-f", "wav", "-c:a", "pcm_s16le"])
        .arg(tmp.path())
        .output()
        .map_err(|e| err(format!("failed to run ffmpeg: {}", e)))?;

    if !status.status.success() {
        let stderr = String::from_utf8_lossy(&status.stderr);
        let tail = stderr.lines().last().unwrap_or("unknown error");
        return Err(err(format!("ffmpeg failed: {}", tail)));
    }

    let mut reader = hound::WavReader::open(tmp.path())
        .map_err(|e| err(format!("failed to read converted audio: {}", e)))?;
    let spec = reader.spec();
    debug!(
        "Converted {} to {} Hz, {} channel(s)",
        audio.display(),
        spec.sample_rate,
        spec.channels
    );
    if spec.sample_rate != WHISPER_SAMPLE_RATE || spec.channels != 1 {
        return Err(err(format!(
            "unexpected converted format: {} Hz, {} channel(s)",
            spec.sample_rate, spec.channels
        )));
    }

    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples = samples.map_err(|e| err(format!("failed to decode samples: {}", e)))?;
    Ok(samples
        .into_iter()
        .map(|s| s as f32 / i16::MAX as f32)
        .collect())
}
