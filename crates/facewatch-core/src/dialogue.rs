//! Voice enrollment dialogue.
//!
//! ```text
//! Idle -> AskConsent --yes--> AskName -> AskAge -> AskMood -> Commit -> Idle
//!            |--no----------> Declined -> Idle
//!            |--exit phrase-> Terminate
//! any prompt --no answer----> Abandoned -> Idle
//! ```
//!
//! [`DialogueState::on_reply`] is a pure transition function; [`EnrollmentDialogue`]
//! drives it from a [`VoiceChannel`].

use crate::voice::{hear, say, VoiceChannel};
use serde::Deserialize;
use std::time::Duration;

/// Prompts and vocabulary of the dialogue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogueScript {
    pub consent_prompt: String,
    pub name_prompt: String,
    pub age_prompt: String,
    pub mood_prompt: String,
    pub declined: String,
    pub abandoned: String,
    pub farewell: String,
    /// `{name}` is replaced by the enrolled name.
    pub welcome: String,
    pub yes_words: Vec<String>,
    pub exit_phrases: Vec<String>,
}

impl Default for DialogueScript {
    fn default() -> Self {
        Self {
            consent_prompt: "I don't know you yet. Would you like to register? Say yes or no.".into(),
            name_prompt: "What is your name?".into(),
            age_prompt: "How old are you?".into(),
            mood_prompt: "How are you feeling today?".into(),
            declined: "Okay, I won't register you.".into(),
            abandoned: "I didn't catch that. Let's try again later.".into(),
            farewell: "Shutting down. Goodbye.".into(),
            welcome: "Nice to meet you, {name}.".into(),
            yes_words: ["yes", "yeah", "yep", "sure", "ok", "okay", "sim"]
                .map(String::from)
                .to_vec(),
            exit_phrases: ["exit", "quit", "shutdown", "shut down", "sair"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Reading of the answer to the consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Yes,
    No,
    Exit,
}

impl DialogueScript {
    /// Exit phrases win over yes-words; anything else is a no.
    pub fn classify_consent(&self, reply: &str) -> Consent {
        let reply = reply.trim().to_lowercase();
        let words: Vec<&str> = reply
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let normalized = words.join(" ");

        let contains_phrase = |phrase: &String| {
            let phrase = phrase.to_lowercase();
            let phrase_words: Vec<&str> = phrase.split_whitespace().collect();
            !phrase_words.is_empty()
                && words
                    .windows(phrase_words.len())
                    .any(|window| window == phrase_words.as_slice())
        };

        if self.exit_phrases.iter().any(contains_phrase) {
            Consent::Exit
        } else if self.yes_words.iter().any(contains_phrase) {
            Consent::Yes
        } else {
            tracing::debug!(reply = %normalized, "consent not given");
            Consent::No
        }
    }

    pub fn welcome_for(&self, name: &str) -> String {
        self.welcome.replace("{name}", name)
    }
}

/// One transcribed answer, or silence/failure/timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Heard(String),
    NoAnswer,
}

impl From<Option<String>> for Reply {
    fn from(text: Option<String>) -> Self {
        match text {
            Some(text) if !text.trim().is_empty() => Reply::Heard(text.trim().to_string()),
            _ => Reply::NoAnswer,
        }
    }
}

/// Collected answers, all non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answers {
    pub name: String,
    pub age: String,
    pub mood: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueState {
    Idle,
    AskConsent,
    AskName,
    AskAge { name: String },
    AskMood { name: String, age: String },
    Commit(Answers),
    Declined,
    Abandoned,
    Terminate,
}

impl DialogueState {
    /// The prompt to speak in this state, if it waits for an answer.
    pub fn prompt<'a>(&self, script: &'a DialogueScript) -> Option<&'a str> {
        match self {
            DialogueState::AskConsent => Some(&script.consent_prompt),
            DialogueState::AskName => Some(&script.name_prompt),
            DialogueState::AskAge { .. } => Some(&script.age_prompt),
            DialogueState::AskMood { .. } => Some(&script.mood_prompt),
            _ => None,
        }
    }

    pub fn on_reply(self, reply: Reply, script: &DialogueScript) -> DialogueState {
        let Reply::Heard(text) = reply else {
            return match self {
                DialogueState::AskConsent
                | DialogueState::AskName
                | DialogueState::AskAge { .. }
                | DialogueState::AskMood { .. } => DialogueState::Abandoned,
                other => other,
            };
        };

        match self {
            DialogueState::AskConsent => match script.classify_consent(&text) {
                Consent::Yes => DialogueState::AskName,
                Consent::No => DialogueState::Declined,
                Consent::Exit => DialogueState::Terminate,
            },
            DialogueState::AskName => DialogueState::AskAge { name: text },
            DialogueState::AskAge { name } => DialogueState::AskMood { name, age: text },
            DialogueState::AskMood { name, age } => DialogueState::Commit(Answers { name, age, mood: text }),
            other => other,
        }
    }
}

/// How a dialogue ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueOutcome {
    Enrolled(Answers),
    Declined,
    Abandoned,
    Terminate,
}

/// Runs one dialogue to completion over a voice channel. Blocks for its whole duration.
pub struct EnrollmentDialogue<'a> {
    script: &'a DialogueScript,
    listen_timeout: Duration,
}

impl<'a> EnrollmentDialogue<'a> {
    pub fn new(script: &'a DialogueScript, listen_timeout: Duration) -> Self {
        Self { script, listen_timeout }
    }

    pub fn run(&self, voice: &mut dyn VoiceChannel) -> DialogueOutcome {
        let mut state = DialogueState::AskConsent;
        tracing::info!("enrollment dialogue started");

        while let Some(prompt) = state.prompt(self.script) {
            say(voice, prompt);
            let reply = Reply::from(hear(voice, self.listen_timeout));
            state = state.on_reply(reply, self.script);
        }

        let outcome = match state {
            DialogueState::Commit(answers) => DialogueOutcome::Enrolled(answers),
            DialogueState::Declined => {
                say(voice, &self.script.declined);
                DialogueOutcome::Declined
            }
            DialogueState::Terminate => {
                say(voice, &self.script.farewell);
                DialogueOutcome::Terminate
            }
            _ => {
                say(voice, &self.script.abandoned);
                DialogueOutcome::Abandoned
            }
        };
        tracing::info!(?outcome, "enrollment dialogue finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::VoiceError;
    use std::collections::VecDeque;

    struct Scripted {
        replies: VecDeque<Option<String>>,
        spoken: Vec<String>,
    }

    impl Scripted {
        fn new(replies: &[Option<&str>]) -> Self {
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

    fn run(replies: &[Option<&str>]) -> (DialogueOutcome, Scripted) {
        let script = DialogueScript::default();
        let mut voice = Scripted::new(replies);
        let outcome = EnrollmentDialogue::new(&script, Duration::from_secs(5)).run(&mut voice);
        (outcome, voice)
    }

    #[test]
    fn test_full_enrollment() {
        let (outcome, voice) = run(&[Some("Yes please"), Some("Marta"), Some("34"), Some("cheerful")]);
        assert_eq!(
            outcome,
            DialogueOutcome::Enrolled(Answers {
                name: "Marta".into(),
                age: "34".into(),
                mood: "cheerful".into(),
            })
        );
        assert_eq!(voice.spoken.len(), 4);
    }

    #[test]
    fn test_decline() {
        let (outcome, voice) = run(&[Some("no thanks")]);
        assert_eq!(outcome, DialogueOutcome::Declined);
        assert_eq!(voice.spoken.last().unwrap(), &DialogueScript::default().declined);
    }

    #[test]
    fn test_exit_phrase_terminates() {
        let (outcome, _) = run(&[Some("please exit now")]);
        assert_eq!(outcome, DialogueOutcome::Terminate);
    }

    #[test]
    fn test_silence_at_age_abandons() {
        let (outcome, voice) = run(&[Some("yes"), Some("Marta"), None]);
        assert_eq!(outcome, DialogueOutcome::Abandoned);
        // consent, name, age prompts, then the notice; mood is never asked
        assert_eq!(voice.spoken.len(), 4);
        assert!(!voice.spoken.contains(&DialogueScript::default().mood_prompt));
    }

    #[test]
    fn test_blank_transcription_is_no_answer() {
        let (outcome, _) = run(&[Some("yes"), Some("   ")]);
        assert_eq!(outcome, DialogueOutcome::Abandoned);
    }

    #[test]
    fn test_listen_error_is_no_answer() {
        struct Broken;
        impl VoiceChannel for Broken {
            fn speak(&mut self, _text: &str) -> Result<(), VoiceError> {
                Ok(())
            }
            fn listen(&mut self, _timeout: Duration) -> Result<Option<String>, VoiceError> {
                Err(VoiceError::Io(std::io::Error::other("mic unplugged")))
            }
        }
        let script = DialogueScript::default();
        let outcome = EnrollmentDialogue::new(&script, Duration::from_secs(1)).run(&mut Broken);
        assert_eq!(outcome, DialogueOutcome::Abandoned);
    }

    #[test]
    fn test_classify_consent() {
        let script = DialogueScript::default();
        assert_eq!(script.classify_consent("Yes!"), Consent::Yes);
        assert_eq!(script.classify_consent("sim"), Consent::Yes);
        assert_eq!(script.classify_consent("nope"), Consent::No);
        assert_eq!(script.classify_consent("yesterday"), Consent::No);
        assert_eq!(script.classify_consent("yes, shut down"), Consent::Exit);
        assert_eq!(script.classify_consent("QUIT"), Consent::Exit);
    }

    #[test]
    fn test_transitions_are_pure() {
        let script = DialogueScript::default();
        let state = DialogueState::AskAge { name: "Li".into() };
        assert_eq!(
            state.clone().on_reply(Reply::Heard("9".into()), &script),
            DialogueState::AskMood { name: "Li".into(), age: "9".into() }
        );
        assert_eq!(state.on_reply(Reply::NoAnswer, &script), DialogueState::Abandoned);
        assert_eq!(DialogueState::Idle.on_reply(Reply::NoAnswer, &script), DialogueState::Idle);
        assert!(DialogueState::Idle.prompt(&script).is_none());
    }

    #[test]
    fn test_welcome_template() {
        assert_eq!(DialogueScript::default().welcome_for("Rui"), "Nice to meet you, Rui.");
    }
}
