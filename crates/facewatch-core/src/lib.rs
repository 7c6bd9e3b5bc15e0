//! facewatch-core: identification, registry and enrollment logic of the live face loop.
//!
//! Face detection/embedding and speech are reached through the capability
//! traits in [`vision`] and [`voice`]; the SCRFD/ArcFace ONNX backend lives in
//! [`detector`] and [`recognizer`].

pub mod annotate;
pub mod announcer;
pub mod detector;
pub mod dialogue;
pub mod matcher;
pub mod recognizer;
pub mod registry;
pub mod session;
pub mod types;
pub mod vision;
pub mod voice;

pub use annotate::{Annotator, Overlay};
pub use dialogue::{DialogueOutcome, DialogueScript};
pub use registry::{RegistryError, RegistryStore};
pub use session::{Cycle, Session, SessionError, SessionSettings};
pub use types::{
    BoundingBox, DetectedFace, Embedding, FaceObservation, Identification, IdentityRecord,
    MatchSource, Profile, ReferenceIdentity,
};
pub use vision::{
    CosineComparator, EuclideanComparator, FaceAnalyzer, FaceComparator, OnnxAnalyzer,
    VisionError,
};
pub use voice::{VoiceChannel, VoiceError};
