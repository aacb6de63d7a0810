//! Speech input and output.
//!
//! - [`SpeechToText`] / [`TextToSpeech`]: provider traits. [`OpenAiSpeech`]
//!   implements both against the OpenAI-compatible audio endpoints.
//! - [`AudioDevice`]: where clips are recorded from and played to. The
//!   shipped [`WavFileDevice`] reads recordings from a WAV file and writes
//!   playback as WAV files, so no sound card binding is needed.
//! - [`AudioChannel`]: wraps a device so only one recording or playback
//!   runs at a time.

pub mod wav;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;

use docchat_core::error::ServiceError;

use crate::config::SpeechConfig;
use crate::http;

/// Sample rate of `response_format = "pcm"` from the speech endpoint.
pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// Mono audio, samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Convert to `target` Hz. Downsampling averages the input samples
    /// behind each output sample; upsampling interpolates linearly.
    pub fn resample(&self, target: u32) -> AudioClip {
        if target == self.sample_rate || target == 0 || self.sample_rate == 0 || self.samples.is_empty() {
            return self.clone();
        }
        let n = self.samples.len();
        let ratio = self.sample_rate as f64 / target as f64;
        let out_len = (n as f64 / ratio).round() as usize;
        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let start = (pos.floor() as usize).min(n - 1);
                if ratio > 1.0 {
                    let end = (((i + 1) as f64 * ratio).floor() as usize).clamp(start + 1, n);
                    let window = &self.samples[start..end];
                    window.iter().sum::<f32>() / window.len() as f32
                } else {
                    let frac = (pos - start as f64) as f32;
                    let a = self.samples[start];
                    let b = self.samples[(start + 1).min(n - 1)];
                    a + (b - a) * frac
                }
            })
            .collect();
        AudioClip {
            sample_rate: target,
            samples,
        }
    }
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, ServiceError>;
}

/// Blocking audio I/O. Called from a blocking thread by [`AudioChannel`].
pub trait AudioDevice: Send + Sync {
    fn record(&self, duration: Duration, sample_rate: u32) -> Result<AudioClip>;
    /// Play a clip. Returns where it went, when that is a file.
    fn play(&self, clip: &AudioClip) -> Result<Option<PathBuf>>;
}

/// Exclusive access to an [`AudioDevice`].
pub struct AudioChannel {
    device: Arc<dyn AudioDevice>,
    busy: tokio::sync::Mutex<()>,
}

impl AudioChannel {
    pub fn new(device: Arc<dyn AudioDevice>) -> Self {
        Self {
            device,
            busy: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn record(&self, duration: Duration, sample_rate: u32) -> Result<AudioClip> {
        let _guard = self.busy.lock().await;
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || device.record(duration, sample_rate)).await?
    }

    pub async fn play(&self, clip: AudioClip) -> Result<Option<PathBuf>> {
        let _guard = self.busy.lock().await;
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || device.play(&clip)).await?
    }
}

/// Reads the "microphone" from a WAV file and "plays" into numbered WAV
/// files under `output_dir`.
pub struct WavFileDevice {
    input: Option<PathBuf>,
    output_dir: PathBuf,
    played: AtomicU64,
}

impl WavFileDevice {
    pub fn new(input: Option<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input,
            output_dir: output_dir.into(),
            played: AtomicU64::new(0),
        }
    }
}

impl AudioDevice for WavFileDevice {
    /// The file may be at any rate; the clip comes back at `sample_rate`.
    fn record(&self, duration: Duration, sample_rate: u32) -> Result<AudioClip> {
        let path = self
            .input
            .as_ref()
            .ok_or_else(|| anyhow!("no input WAV configured for recording (use --voice <file>)"))?;
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read recording: {}", path.display()))?;
        let mut clip = wav::decode(&bytes)
            .with_context(|| format!("Failed to decode recording: {}", path.display()))?;
        let max = (duration.as_secs_f64() * clip.sample_rate as f64).round() as usize;
        clip.samples.truncate(max);
        Ok(clip.resample(sample_rate))
    }

    fn play(&self, clip: &AudioClip) -> Result<Option<PathBuf>> {
        std::fs::create_dir_all(&self.output_dir)?;
        let n = self.played.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.output_dir.join(format!("reply-{:04}.wav", n));
        std::fs::write(&path, wav::encode(clip))
            .with_context(|| format!("Failed to write audio: {}", path.display()))?;
        tracing::info!(path = %path.display(), secs = clip.duration().as_secs_f32(), "played audio");
        Ok(Some(path))
    }
}

/// OpenAI-compatible `/v1/audio/transcriptions` and `/v1/audio/speech`.
pub struct OpenAiSpeech {
    client: reqwest::Client,
    url: String,
    api_key: String,
    stt_model: String,
    tts_model: String,
    voice: String,
}

impl OpenAiSpeech {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let api_key = http::api_key_from_env(&config.api_key_env)
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        Ok(Self {
            client: http::client()?,
            url: config
                .url
                .as_deref()
                .unwrap_or("https://api.openai.com")
                .trim_end_matches('/')
                .to_string(),
            api_key,
            stt_model: config.stt_model.clone(),
            tts_model: config.tts_model.clone(),
            voice: config.voice.clone(),
        })
    }
}

#[async_trait]
impl SpeechToText for OpenAiSpeech {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, ServiceError> {
        let file = reqwest::multipart::Part::bytes(wav::encode(clip))
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| ServiceError::Terminal(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.stt_model.clone())
            .part("file", file);

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| http::transport_error("transcription", e))?;
        let json = http::json_body("transcription", response).await?;
        json["text"]
            .as_str()
            .map(|t| t.trim().to_string())
            .ok_or_else(|| ServiceError::Terminal("transcription response missing text".to_string()))
    }
}

#[async_trait]
impl TextToSpeech for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, ServiceError> {
        let body = serde_json::json!({
            "model": self.tts_model,
            "voice": self.voice,
            "input": text,
            "response_format": "pcm",
        });
        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error("speech", e))?;
        let response = http::check_status("speech", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| http::transport_error("speech", e))?;
        Ok(wav::pcm16_to_clip(&bytes, TTS_SAMPLE_RATE))
    }
}

/// Speech providers selected by `speech.provider`; `None` when disabled.
pub type SpeechProviders = Option<(Arc<dyn SpeechToText>, Arc<dyn TextToSpeech>)>;

pub fn create_speech(config: &SpeechConfig) -> Result<SpeechProviders> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => {
            let speech = Arc::new(OpenAiSpeech::new(config)?);
            let stt: Arc<dyn SpeechToText> = speech.clone();
            let tts: Arc<dyn TextToSpeech> = speech;
            Ok(Some((stt, tts)))
        }
        other => bail!("Unknown speech provider: {}", other),
    }
}
