//! Identification session: the explicit context object of the live loop.
//!
//! Owns the in-memory registry (records and embeddings, index-aligned), the
//! optional reference identity, the greeting state and the dialogue gate.
//! Capabilities are passed in per call.

use crate::announcer::Greeter;
use crate::dialogue::{DialogueOutcome, DialogueScript, EnrollmentDialogue};
use crate::matcher::{Match, Matcher};
use crate::registry::{RegistryError, RegistryStore};
use crate::types::{
    DetectedFace, Embedding, FaceObservation, Identification, IdentityRecord, ReferenceIdentity,
};
use crate::vision::FaceComparator;
use crate::voice::{say, VoiceChannel};
use image::RgbImage;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Tunables fixed at startup.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub tolerance: f32,
    pub greeting_cooldown: Duration,
    pub greeting_template: String,
    pub listen_timeout: Duration,
    /// No new dialogue is started this long after a declined or abandoned one.
    pub retry_after: Duration,
    pub script: DialogueScript,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            greeting_cooldown: Duration::from_secs(10),
            greeting_template: "Hello, {name}!".into(),
            listen_timeout: Duration::from_secs(5),
            retry_after: Duration::from_secs(15),
            script: DialogueScript::default(),
        }
    }
}

/// Result of one processing cycle.
#[derive(Debug)]
pub struct Cycle {
    pub faces: Vec<DetectedFace>,
    /// A dialogue asked the process to terminate.
    pub terminate: bool,
}

pub struct Session {
    store: RegistryStore,
    records: Vec<IdentityRecord>,
    embeddings: Vec<Embedding>,
    reference: Option<ReferenceIdentity>,
    matcher: Matcher,
    greeter: Greeter,
    script: DialogueScript,
    listen_timeout: Duration,
    retry_after: Duration,
    quiet_until: Option<Instant>,
}

impl Session {
    /// Load the registry and build the session.
    pub fn open(
        store: RegistryStore,
        reference: Option<ReferenceIdentity>,
        comparator: Box<dyn FaceComparator>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let (records, embeddings) = store.load()?;
        Ok(Self {
            store,
            records,
            embeddings,
            reference,
            matcher: Matcher::new(comparator, settings.tolerance),
            greeter: Greeter::new(settings.greeting_cooldown, settings.greeting_template),
            script: settings.script,
            listen_timeout: settings.listen_timeout,
            retry_after: settings.retry_after,
            quiet_until: None,
        })
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn reference(&self) -> Option<&ReferenceIdentity> {
        self.reference.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn identify(&self, probe: &Embedding) -> Identification {
        let reference = self.reference.as_ref().map(|r| &r.embedding);
        match self.matcher.identify(probe, &self.embeddings, reference) {
            Match::Registry(index) => Identification::Registry {
                index,
                profile: self.records[index].profile(),
            },
            Match::Reference => match &self.reference {
                Some(reference) => Identification::Reference(reference.profile.clone()),
                None => Identification::Unknown,
            },
            Match::Unknown => Identification::Unknown,
        }
    }

    /// Identify every observation from scratch.
    pub fn resolve(&self, observations: Vec<FaceObservation>) -> Vec<DetectedFace> {
        observations
            .into_iter()
            .map(|obs| {
                let identification = self.identify(&obs.embedding);
                DetectedFace {
                    bbox: obs.bbox,
                    embedding: obs.embedding,
                    identification,
                }
            })
            .collect()
    }

    /// Greet registry matches, subject to the cooldown.
    pub fn greet(&mut self, faces: &[DetectedFace], voice: &mut dyn VoiceChannel, now: Instant) {
        for face in faces {
            if let Identification::Registry { profile, .. } = &face.identification {
                if let Some(greeting) = self.greeter.greeting(&profile.name, now) {
                    say(voice, &greeting);
                }
            }
        }
    }

    /// Whether a dialogue may start at `now`.
    pub fn dialogue_allowed(&self, now: Instant) -> bool {
        self.quiet_until.map_or(true, |until| now >= until)
    }

    /// Run the enrollment dialogue for one unknown face and commit on success.
    ///
    /// On commit the new record is appended to the store and to the in-memory
    /// lists, so it matches from the next processed frame on. A declined or
    /// abandoned dialogue holds off new ones for `retry_after` from `now`.
    pub fn enroll(
        &mut self,
        embedding: &Embedding,
        frame: &RgbImage,
        voice: &mut dyn VoiceChannel,
        now: Instant,
    ) -> Result<DialogueOutcome, SessionError> {
        let outcome = EnrollmentDialogue::new(&self.script, self.listen_timeout).run(voice);

        match &outcome {
            DialogueOutcome::Enrolled(answers) => {
                let record = self.store.append(
                    &answers.name,
                    &answers.age,
                    &answers.mood,
                    embedding,
                    frame,
                )?;
                self.embeddings.push(record.embedding.clone());
                self.records.push(record);
                say(voice, &self.script.welcome_for(&answers.name));
            }
            DialogueOutcome::Declined | DialogueOutcome::Abandoned => {
                self.quiet_until = Some(now + self.retry_after);
            }
            DialogueOutcome::Terminate => {}
        }
        Ok(outcome)
    }

    /// Identify, greet, and start at most one dialogue for the first unknown face.
    ///
    /// `observations` must already be in the coordinates of `frame`.
    pub fn process(
        &mut self,
        observations: Vec<FaceObservation>,
        frame: &RgbImage,
        voice: &mut dyn VoiceChannel,
        now: Instant,
    ) -> Result<Cycle, SessionError> {
        let faces = self.resolve(observations);
        self.greet(&faces, voice, now);

        let mut terminate = false;
        let unknown = faces
            .iter()
            .find(|f| f.identification == Identification::Unknown);
        if let Some(face) = unknown {
            if self.dialogue_allowed(now) {
                let outcome = self.enroll(&face.embedding, frame, voice, now)?;
                terminate = outcome == DialogueOutcome::Terminate;
            } else {
                tracing::trace!("unknown face, dialogue on hold");
            }
        }

        Ok(Cycle { faces, terminate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Profile};
    use crate::vision::EuclideanComparator;
    use crate::voice::VoiceError;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<Option<String>>,
        spoken: Vec<String>,
    }

    impl Scripted {
        fn with_replies(replies: &[Option<&str>]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.map(String::from)).collect(),
                spoken: Vec::new(),
            }
        }
    }

    impl VoiceChannel for Scripted {
        fn speak(&mut self, text: &str) -> Result<(), VoiceError> {
            self.spoken.push(text.to_string());
            Ok(())
        }
        fn listen(&mut self, _timeout: Duration) -> Result<Option<String>, VoiceError> {
            Ok(self.replies.pop_front().flatten())
        }
    }

    fn observation(values: &[f32]) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox { x: 1.0, y: 1.0, width: 4.0, height: 4.0, confidence: 0.9 },
            embedding: Embedding::new(values.to_vec()),
        }
    }

    fn open(dir: &std::path::Path, reference: Option<ReferenceIdentity>, retry_after: Duration) -> Session {
        let settings = SessionSettings { retry_after, ..SessionSettings::default() };
        Session::open(RegistryStore::new(dir), reference, Box::new(EuclideanComparator), settings).unwrap()
    }

    fn frame() -> RgbImage {
        RgbImage::new(16, 16)
    }

    #[test]
    fn test_reference_identification() {
        let dir = tempfile::tempdir().unwrap();
        let reference = ReferenceIdentity {
            profile: Profile { name: "Luiz".into(), age: "22".into(), mood: "Neutral".into() },
            embedding: Embedding::new(vec![1.0, 0.0]),
        };
        let session = open(dir.path(), Some(reference), Duration::ZERO);
        let id = session.identify(&Embedding::new(vec![1.1, 0.0]));
        assert!(matches!(id, Identification::Reference(ref p) if p.name == "Luiz"));
        assert_eq!(session.identify(&Embedding::new(vec![5.0, 0.0])), Identification::Unknown);
    }

    #[test]
    fn test_known_face_greets_once_within_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        RegistryStore::new(dir.path())
            .append("Ana", "30", "calm", &Embedding::new(vec![0.0, 0.0]), &frame())
            .unwrap();
        let mut session = open(dir.path(), None, Duration::ZERO);
        let mut voice = Scripted::default();

        let t0 = Instant::now();
        session.process(vec![observation(&[0.1, 0.0])], &frame(), &mut voice, t0).unwrap();
        session
            .process(vec![observation(&[0.1, 0.0])], &frame(), &mut voice, t0 + Duration::from_secs(2))
            .unwrap();
        assert_eq!(voice.spoken, vec!["Hello, Ana!".to_string()]);

        session
            .process(vec![observation(&[0.1, 0.0])], &frame(), &mut voice, t0 + Duration::from_secs(11))
            .unwrap();
        assert_eq!(voice.spoken.len(), 2);
    }

    #[test]
    fn test_declined_dialogue_is_not_repeated_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), None, Duration::from_secs(60));
        let mut voice = Scripted::with_replies(&[Some("no")]);

        let now = Instant::now();
        session.process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, now).unwrap();
        let spoken = voice.spoken.len();
        session.process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, now).unwrap();
        assert_eq!(voice.spoken.len(), spoken, "second cycle must not prompt again");
        assert!(session.is_empty());
    }

    #[test]
    fn test_retry_gate_follows_the_cycle_clock() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), None, Duration::from_secs(15));
        let mut voice = Scripted::with_replies(&[Some("no"), Some("no")]);

        let t0 = Instant::now();
        session.process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, t0).unwrap();
        assert!(!session.dialogue_allowed(t0 + Duration::from_secs(14)));
        assert!(session.dialogue_allowed(t0 + Duration::from_secs(15)));

        let prompts = voice.spoken.len();
        session
            .process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, t0 + Duration::from_secs(10))
            .unwrap();
        assert_eq!(voice.spoken.len(), prompts);
        session
            .process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, t0 + Duration::from_secs(16))
            .unwrap();
        assert!(voice.spoken.len() > prompts, "gate reopens once retry_after has passed");
    }

    #[test]
    fn test_only_first_unknown_face_gets_a_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), None, Duration::ZERO);
        let mut voice = Scripted::with_replies(&[Some("yes"), Some("Ana"), Some("30"), Some("fine")]);

        let cycle = session
            .process(
                vec![observation(&[3.0, 3.0]), observation(&[9.0, 9.0])],
                &frame(),
                &mut voice,
                Instant::now(),
            )
            .unwrap();
        assert_eq!(cycle.faces.len(), 2);
        assert_eq!(session.len(), 1);
        assert_eq!(session.embeddings()[0].values, vec![3.0, 3.0]);
    }

    #[test]
    fn test_unanswered_age_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), None, Duration::ZERO);
        let mut voice = Scripted::with_replies(&[Some("yes"), Some("Marta"), None]);

        let outcome = session
            .enroll(&Embedding::new(vec![3.0, 3.0]), &frame(), &mut voice, Instant::now())
            .unwrap();
        assert_eq!(outcome, DialogueOutcome::Abandoned);
        assert_eq!(session.len(), 0);
        assert!(!session.store.registry_path().exists());
        assert!(RegistryStore::new(dir.path()).load().unwrap().0.is_empty());
    }

    #[test]
    fn test_enrolled_face_matches_on_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), None, Duration::ZERO);
        assert!(session.is_empty());
        let mut voice =
            Scripted::with_replies(&[Some("yes"), Some("Marta"), Some("34"), Some("cheerful")]);

        let first = session
            .process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, Instant::now())
            .unwrap();
        assert_eq!(first.faces[0].identification, Identification::Unknown);
        assert!(!first.terminate);
        assert_eq!(session.len(), 1);
        assert_eq!(session.records().len(), session.embeddings().len());
        assert_eq!(voice.spoken.last().unwrap(), "Nice to meet you, Marta.");

        let second = session
            .process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, Instant::now())
            .unwrap();
        match &second.faces[0].identification {
            Identification::Registry { index, profile } => {
                assert_eq!(*index, 0);
                assert_eq!(profile.name, "Marta");
                assert_eq!(profile.age, "34");
            }
            other => panic!("expected registry match, got {other:?}"),
        }

        // Persisted as well
        let (records, _) = RegistryStore::new(dir.path()).load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mood, "cheerful");
    }

    #[test]
    fn test_exit_phrase_requests_termination() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), None, Duration::ZERO);
        let mut voice = Scripted::with_replies(&[Some("exit")]);
        let cycle = session
            .process(vec![observation(&[3.0, 3.0])], &frame(), &mut voice, Instant::now())
            .unwrap();
        assert!(cycle.terminate);
        assert!(session.is_empty());
    }
}
