//! Voice backends: external TTS/STT programs, or a silent stand-in.

use crate::config::{VoiceBackend, VoiceConfig};
use facewatch_core::{VoiceChannel, VoiceError};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Build the configured voice channel.
pub fn open_voice(config: &VoiceConfig) -> Box<dyn VoiceChannel> {
    match config.backend {
        VoiceBackend::Silent => {
            tracing::info!("voice backend: silent");
            Box::new(SilentVoice)
        }
        VoiceBackend::Command => {
            tracing::info!(
                speak = ?config.speak_command,
                listen = ?config.listen_command,
                "voice backend: command"
            );
            Box::new(
                CommandVoice::new(config.speak_command.clone(), config.listen_command.clone())
                    .with_grace(Duration::from_secs(config.transcribe_grace_secs)),
            )
        }
    }
}

/// Logs what would be said and never hears anything.
pub struct SilentVoice;

impl VoiceChannel for SilentVoice {
    fn speak(&mut self, text: &str) -> Result<(), VoiceError> {
        tracing::info!(text, "say");
        Ok(())
    }

    fn listen(&mut self, _timeout: Duration) -> Result<Option<String>, VoiceError> {
        Ok(None)
    }
}

/// Speech through external programs.
///
/// `speak_command` gets the text as its final argument and is waited on.
/// `listen_command` prints the transcription to stdout; `{timeout}` in its
/// arguments is replaced by the timeout in whole seconds. A listener still
/// running after the timeout plus the transcription grace is killed and counts
/// as no answer.
pub struct CommandVoice {
    speak_command: Vec<String>,
    listen_command: Vec<String>,
    grace: Duration,
}

impl CommandVoice {
    pub fn new(speak_command: Vec<String>, listen_command: Vec<String>) -> Self {
        Self {
            speak_command,
            listen_command,
            grace: Duration::ZERO,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

fn split_program(argv: &[String]) -> Result<(&String, &[String]), VoiceError> {
    argv.split_first().ok_or_else(|| VoiceError::Spawn {
        command: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })
}

impl VoiceChannel for CommandVoice {
    fn speak(&mut self, text: &str) -> Result<(), VoiceError> {
        let (program, args) = split_program(&self.speak_command)?;
        let status = Command::new(program)
            .args(args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|source| VoiceError::Spawn {
                command: program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(VoiceError::Failed {
                command: program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    fn listen(&mut self, timeout: Duration) -> Result<Option<String>, VoiceError> {
        let secs = timeout.as_secs().max(1).to_string();
        let argv: Vec<String> = self
            .listen_command
            .iter()
            .map(|arg| arg.replace("{timeout}", &secs))
            .collect();
        let (program, args) = split_program(&argv)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| VoiceError::Spawn {
                command: program.clone(),
                source,
            })?;

        // Read stdout concurrently so a chatty listener cannot fill the pipe and stall.
        let reader = child.stdout.take().map(|mut stdout| {
            std::thread::spawn(move || {
                let mut output = String::new();
                stdout.read_to_string(&mut output).map(|_| output)
            })
        });

        let deadline = Instant::now() + timeout + self.grace;
        loop {
            if let Some(status) = child.try_wait()? {
                let output = match reader {
                    Some(handle) => handle
                        .join()
                        .map_err(|_| std::io::Error::other("listener output reader panicked"))??,
                    None => String::new(),
                };
                if !status.success() {
                    return Err(VoiceError::Failed {
                        command: program.clone(),
                        status: status.to_string(),
                    });
                }
                let output = output.trim();
                return Ok((!output.is_empty()).then(|| output.to_string()));
            }
            if Instant::now() >= deadline {
                tracing::debug!(command = %program, "listener timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
