use anyhow::{bail, Context, Result};
use facewatch_core::{
    CosineComparator, DialogueScript, EuclideanComparator, FaceComparator, Profile,
    SessionSettings,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, fixed at startup.
///
/// Read from an optional TOML file, then overridden by `FACEWATCH_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub sampler: SamplerConfig,
    pub matching: MatchingConfig,
    pub models: ModelConfig,
    pub storage: StorageConfig,
    pub reference: ReferenceConfig,
    pub voice: VoiceConfig,
    pub greeting: GreetingConfig,
    pub dialogue: DialogueConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device path.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Frames discarded after opening (auto-exposure settling).
    pub warmup_frames: usize,
    pub retry_delay_ms: u64,
    /// Longest a single frame read may block on the driver.
    pub read_timeout_ms: u64,
    /// Consecutive failed reads before the loop gives up.
    pub max_read_failures: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            warmup_frames: 4,
            retry_delay_ms: 100,
            read_timeout_ms: 500,
            max_read_failures: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Run detection on every Nth frame.
    pub process_every: u32,
    /// Spatial scale applied before detection.
    pub downscale: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { process_every: 4, downscale: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMetric {
    /// `1 - cosine similarity`; the scale of normalised ArcFace embeddings.
    Cosine,
    /// Plain L2 distance.
    Euclidean,
}

impl MatchMetric {
    pub fn comparator(self) -> Box<dyn FaceComparator> {
        match self {
            MatchMetric::Cosine => Box::new(CosineComparator),
            MatchMetric::Euclidean => Box::new(EuclideanComparator),
        }
    }
}

impl FromStr for MatchMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(MatchMetric::Cosine),
            "euclidean" => Ok(MatchMetric::Euclidean),
            other => Err(format!("unknown match metric {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub metric: MatchMetric,
    /// Maximum embedding distance (exclusive) for a match, in the metric's units.
    pub tolerance: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            metric: MatchMetric::Cosine,
            tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: PathBuf,
    pub detector: String,
    pub recognizer: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("models"),
            detector: "det_10g.onnx".into(),
            recognizer: "w600k_r50.onnx".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Holds `registry.jsonl` and the `photos/` directory.
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./facewatch-data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub image: Option<PathBuf>,
    pub name: String,
    pub age: String,
    pub mood: String,
    /// Abort startup when the reference image is unusable.
    pub required: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            image: Some(PathBuf::from("reference.jpg")),
            name: "Reference".into(),
            age: "-".into(),
            mood: "Neutral".into(),
            required: false,
        }
    }
}

impl ReferenceConfig {
    pub fn profile(&self) -> Profile {
        Profile {
            name: self.name.clone(),
            age: self.age.clone(),
            mood: self.mood.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceBackend {
    /// Prompts are logged, nothing is ever heard.
    Silent,
    /// External TTS/STT programs.
    Command,
}

impl FromStr for VoiceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(VoiceBackend::Silent),
            "command" => Ok(VoiceBackend::Command),
            other => Err(format!("unknown voice backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub backend: VoiceBackend,
    /// Program and arguments; the text is appended as the last argument.
    pub speak_command: Vec<String>,
    /// Program and arguments; `{timeout}` is replaced by the timeout in seconds.
    /// The transcription is read from stdout.
    pub listen_command: Vec<String>,
    pub listen_timeout_secs: u64,
    /// Extra time the listener gets after the timeout to finish transcribing.
    pub transcribe_grace_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            backend: VoiceBackend::Silent,
            speak_command: vec!["espeak-ng".into()],
            listen_command: Vec::new(),
            listen_timeout_secs: 5,
            transcribe_grace_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GreetingConfig {
    pub cooldown_secs: u64,
    /// `{name}` is replaced by the recognised name.
    pub template: String,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10,
            template: "Hello, {name}!".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    pub retry_after_secs: u64,
    #[serde(flatten)]
    pub script: DialogueScript,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            retry_after_secs: 15,
            script: DialogueScript::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    /// Defaults to `<output_dir>/live.jpg`.
    pub path: Option<PathBuf>,
    /// TTF/OTF font for identity text; boxes only without it.
    pub font: Option<PathBuf>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { enabled: true, path: None, font: None }
    }
}

/// `$XDG_DATA_HOME/facewatch`, falling back to `~/.local/share/facewatch`.
fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch")
}

impl Config {
    /// Load from `path` (or defaults), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `FACEWATCH_*` variables as returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEWATCH_CAMERA_DEVICE") {
            self.camera.device = v;
        }
        if let Some(v) = lookup("FACEWATCH_MODEL_DIR") {
            self.models.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWATCH_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWATCH_REFERENCE_IMAGE") {
            self.reference.image = Some(PathBuf::from(v));
        }
        if let Some(v) = env_parse(&lookup, "FACEWATCH_TOLERANCE") {
            self.matching.tolerance = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEWATCH_MATCH_METRIC") {
            self.matching.metric = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEWATCH_PROCESS_EVERY") {
            self.sampler.process_every = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEWATCH_DOWNSCALE") {
            self.sampler.downscale = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEWATCH_VOICE_BACKEND") {
            self.voice.backend = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampler.process_every == 0 {
            bail!("sampler.process_every must be at least 1");
        }
        if !(self.sampler.downscale > 0.0 && self.sampler.downscale <= 1.0) {
            bail!("sampler.downscale must be in (0, 1], got {}", self.sampler.downscale);
        }
        if !(self.matching.tolerance > 0.0) {
            bail!("matching.tolerance must be positive, got {}", self.matching.tolerance);
        }
        if self.voice.backend == VoiceBackend::Command {
            if self.voice.speak_command.is_empty() {
                bail!("voice.speak_command is required for the command backend");
            }
            if self.voice.listen_command.is_empty() {
                bail!("voice.listen_command is required for the command backend");
            }
        }
        Ok(())
    }

    pub fn detector_path(&self) -> PathBuf {
        self.models.dir.join(&self.models.detector)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.models.dir.join(&self.models.recognizer)
    }

    pub fn display_path(&self) -> PathBuf {
        self.display
            .path
            .clone()
            .unwrap_or_else(|| self.storage.output_dir.join("live.jpg"))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            tolerance: self.matching.tolerance,
            greeting_cooldown: Duration::from_secs(self.greeting.cooldown_secs),
            greeting_template: self.greeting.template.clone(),
            listen_timeout: Duration::from_secs(self.voice.listen_timeout_secs),
            retry_after: Duration::from_secs(self.dialogue.retry_after_secs),
            script: self.dialogue.script.clone(),
        }
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
