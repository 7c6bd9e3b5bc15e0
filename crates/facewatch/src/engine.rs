use crate::config::{Config, ReferenceConfig};
use crate::display::{Display, DisplayError, HeadlessDisplay, SnapshotDisplay};
use crate::speech;
use facewatch_core::annotate::{self, AnnotateError};
use facewatch_core::vision::embed_image_file;
use facewatch_core::voice::say;
use facewatch_core::{
    Annotator, Cycle, FaceAnalyzer, FaceObservation, OnnxAnalyzer, Overlay,
    ReferenceIdentity, RegistryStore, Session, SessionError, VisionError, VoiceChannel,
};
use facewatch_hw::{Camera, CameraError, FrameSource};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

const STARTUP_FAILED_NOTICE: &str = "Face recognition could not start. Please check the logs.";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("annotation error: {0}")]
    Annotate(#[from] AnnotateError),
    #[error("display error: {0}")]
    Display(#[from] DisplayError),
    #[error("reference image unusable: {0}")]
    Reference(String),
}

/// Why the live loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The stop flag was raised (quit key or interrupt).
    Stopped,
    /// Someone said an exit phrase during a dialogue.
    Terminated,
}

/// Decides which frames are analysed and at what resolution.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    process_every: u32,
    downscale: f32,
    tick: u64,
}

impl FrameSampler {
    pub fn new(process_every: u32, downscale: f32) -> Self {
        Self {
            process_every: process_every.max(1),
            downscale,
            tick: 0,
        }
    }

    /// Advance one frame. The first frame is always due.
    pub fn is_due(&mut self) -> bool {
        let due = self.tick % u64::from(self.process_every) == 0;
        self.tick += 1;
        due
    }

    /// The frame at detection resolution.
    pub fn shrink<'a>(&self, image: &'a RgbImage) -> Cow<'a, RgbImage> {
        if self.downscale >= 1.0 {
            return Cow::Borrowed(image);
        }
        let width = ((image.width() as f32 * self.downscale).round() as u32).max(1);
        let height = ((image.height() as f32 * self.downscale).round() as u32).max(1);
        Cow::Owned(imageops::resize(image, width, height, FilterType::Triangle))
    }

    /// Map boxes found on a shrunk frame of `shrunk_width` back onto a frame of `full_width`.
    pub fn restore(
        &self,
        observations: Vec<FaceObservation>,
        full_width: u32,
        shrunk_width: u32,
    ) -> Vec<FaceObservation> {
        if shrunk_width == 0 || shrunk_width == full_width {
            return observations;
        }
        let factor = full_width as f32 / shrunk_width as f32;
        observations
            .into_iter()
            .map(|obs| FaceObservation {
                bbox: obs.bbox.scaled(factor),
                embedding: obs.embedding,
            })
            .collect()
    }
}

/// Frame read retry policy.
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    pub retry_delay: Duration,
    /// Consecutive failures tolerated before the loop fails.
    pub max_failures: u32,
}

/// The live loop and every resource it owns.
///
/// Resources are dropped exactly once, when [`Engine::run`] returns.
pub struct Engine {
    source: Box<dyn FrameSource>,
    analyzer: Box<dyn FaceAnalyzer>,
    voice: Box<dyn VoiceChannel>,
    display: Box<dyn Display>,
    session: Session,
    sampler: FrameSampler,
    read_policy: ReadPolicy,
    stop: Arc<AtomicBool>,
}

struct Devices {
    camera: Camera,
    analyzer: OnnxAnalyzer,
    session: Session,
    display: Box<dyn Display>,
}

impl Engine {
    /// Acquire camera, models, reference, registry and display.
    ///
    /// Any failure is fatal; it is logged and announced before returning.
    pub fn start(config: &Config, stop: Arc<AtomicBool>) -> Result<Self, EngineError> {
        let mut voice = speech::open_voice(&config.voice);
        let devices = match open_devices(config) {
            Ok(devices) => devices,
            Err(e) => {
                tracing::error!(error = %e, "startup failed");
                say(voice.as_mut(), STARTUP_FAILED_NOTICE);
                return Err(e);
            }
        };

        Ok(Self {
            source: Box::new(devices.camera),
            analyzer: Box::new(devices.analyzer),
            voice,
            display: devices.display,
            session: devices.session,
            sampler: FrameSampler::new(config.sampler.process_every, config.sampler.downscale),
            read_policy: ReadPolicy {
                retry_delay: Duration::from_millis(config.camera.retry_delay_ms),
                max_failures: config.camera.max_read_failures.max(1),
            },
            stop,
        })
    }

    /// Run until stopped, terminated by voice, or a fatal error.
    pub fn run(mut self) -> Result<ExitReason, EngineError> {
        tracing::info!(
            registry = self.session.len(),
            reference = self.session.reference().is_some(),
            "live loop started"
        );

        let mut overlays: Vec<Overlay> = Vec::new();
        let mut failures = 0u32;

        let reason = loop {
            if self.stop.load(Ordering::Relaxed) {
                break ExitReason::Stopped;
            }

            let frame = match self.source.next_frame() {
                Ok(frame) => {
                    failures = 0;
                    frame
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.read_policy.max_failures {
                        tracing::error!(error = %e, failures, "giving up on camera");
                        return Err(e.into());
                    }
                    tracing::warn!(error = %e, failures, "frame read failed, retrying");
                    std::thread::sleep(self.read_policy.retry_delay);
                    continue;
                }
            };

            if self.sampler.is_due() {
                let cycle = self.process(&frame.image)?;
                overlays = annotate::overlays(&cycle.faces);
                if cycle.terminate {
                    break ExitReason::Terminated;
                }
            }

            if let Err(e) = self.display.show(&frame.image, &overlays) {
                tracing::warn!(error = %e, "display update failed");
            }
        };

        tracing::info!(?reason, registry = self.session.len(), "live loop finished");
        Ok(reason)
    }

    /// Detect on the shrunk frame, then identify, greet and maybe enroll on the full one.
    fn process(&mut self, image: &RgbImage) -> Result<Cycle, EngineError> {
        let small = self.sampler.shrink(image);
        let observations = match self.analyzer.detect_and_embed(&small) {
            Ok(observations) => self.sampler.restore(observations, image.width(), small.width()),
            Err(e) => {
                tracing::warn!(error = %e, "face analysis failed on frame");
                return Ok(Cycle {
                    faces: Vec::new(),
                    terminate: false,
                });
            }
        };

        let cycle = self
            .session
            .process(observations, image, self.voice.as_mut(), Instant::now())?;
        Ok(cycle)
    }
}

fn open_devices(config: &Config) -> Result<Devices, EngineError> {
    let mut camera = Camera::open(&config.camera.device, config.camera.width, config.camera.height)?;
    tracing::info!(
        device = %config.camera.device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );
    camera.set_read_timeout(Duration::from_millis(config.camera.read_timeout_ms));
    if config.camera.warmup_frames > 0 {
        tracing::info!(count = config.camera.warmup_frames, "discarding warmup frames");
        camera.discard_frames(config.camera.warmup_frames);
    }

    let detector_path = config.detector_path();
    let recognizer_path = config.recognizer_path();
    let mut analyzer = OnnxAnalyzer::load(&detector_path, &recognizer_path)?;
    tracing::info!(
        detector = %detector_path.display(),
        recognizer = %recognizer_path.display(),
        "face models loaded"
    );

    let reference = load_reference(&mut analyzer, &config.reference)?;

    let store = RegistryStore::new(&config.storage.output_dir);
    let session = Session::open(
        store,
        reference,
        config.matching.metric.comparator(),
        config.session_settings(),
    )?;
    tracing::info!(records = session.len(), "registry loaded");

    let display: Box<dyn Display> = if config.display.enabled {
        let annotator = match &config.display.font {
            Some(font) => Annotator::with_font(font)?,
            None => Annotator::new(),
        };
        Box::new(SnapshotDisplay::new(&config.display_path(), annotator)?)
    } else {
        tracing::info!("display disabled");
        Box::new(HeadlessDisplay::default())
    };

    Ok(Devices {
        camera,
        analyzer,
        session,
        display,
    })
}

/// Embed the reference image. Without `required`, any problem only disables reference matching.
fn load_reference(
    analyzer: &mut dyn FaceAnalyzer,
    config: &ReferenceConfig,
) -> Result<Option<ReferenceIdentity>, EngineError> {
    let Some(path) = &config.image else {
        return Ok(None);
    };

    let problem = if !path.exists() {
        format!("{} not found", path.display())
    } else {
        match embed_image_file(analyzer, path) {
            Ok(Some(embedding)) => {
                tracing::info!(path = %path.display(), name = %config.name, "reference identity loaded");
                return Ok(Some(ReferenceIdentity {
                    profile: config.profile(),
                    embedding,
                }));
            }
            Ok(None) => format!("no face found in {}", path.display()),
            Err(e) => e.to_string(),
        }
    };

    if config.required {
        return Err(EngineError::Reference(problem));
    }
    tracing::warn!(%problem, "reference matching disabled");
    Ok(None)
}

/// Spawn the engine on a dedicated OS thread.
///
/// Everything the loop touches is created on that thread. The receiver
/// resolves with the loop's outcome, including startup failures.
pub fn spawn(
    config: Config,
    stop: Arc<AtomicBool>,
) -> std::io::Result<oneshot::Receiver<Result<ExitReason, EngineError>>> {
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("facewatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = Engine::start(&config, stop).and_then(Engine::run);
            tracing::info!("engine thread exiting");
            let _ = tx.send(result);
        })?;

    Ok(rx)
}
