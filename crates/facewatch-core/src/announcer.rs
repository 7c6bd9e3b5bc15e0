//! Spoken greetings with a repeat cooldown.

use std::time::{Duration, Instant};

/// Greeting state: a single `(last name, last time)` pair for the whole session.
///
/// Several known faces in view share it; only the most recently greeted name is remembered.
#[derive(Debug, Clone)]
pub struct Greeter {
    cooldown: Duration,
    template: String,
    last: Option<(String, Instant)>,
}

impl Greeter {
    /// `template` may contain `{name}`.
    pub fn new(cooldown: Duration, template: impl Into<String>) -> Self {
        Self {
            cooldown,
            template: template.into(),
            last: None,
        }
    }

    /// Returns the greeting to speak for `name` at `now`, or `None` while the cooldown holds.
    ///
    /// The cooldown only suppresses the name greeted last; a different name greets immediately.
    pub fn greeting(&mut self, name: &str, now: Instant) -> Option<String> {
        if let Some((last_name, at)) = &self.last {
            if last_name == name && now.saturating_duration_since(*at) < self.cooldown {
                return None;
            }
        }
        self.last = Some((name.to_string(), now));
        Some(self.template.replace("{name}", name))
    }

    pub fn last_greeted(&self) -> Option<&str> {
        self.last.as_ref().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_suppresses_repeat() {
        let mut greeter = Greeter::new(Duration::from_secs(10), "Hello, {name}!");
        let t0 = Instant::now();
        assert_eq!(greeter.greeting("Ana", t0).as_deref(), Some("Hello, Ana!"));
        assert_eq!(greeter.greeting("Ana", t0 + Duration::from_secs(3)), None);
        assert_eq!(greeter.greeting("Ana", t0 + Duration::from_millis(9_999)), None);
        assert!(greeter.greeting("Ana", t0 + Duration::from_secs(10)).is_some());
    }

    #[test]
    fn test_different_name_greets_immediately() {
        let mut greeter = Greeter::new(Duration::from_secs(10), "Hi {name}");
        let t0 = Instant::now();
        assert!(greeter.greeting("Ana", t0).is_some());
        assert!(greeter.greeting("Bo", t0 + Duration::from_secs(1)).is_some());
        // Bo replaced Ana as the remembered name
        assert!(greeter.greeting("Ana", t0 + Duration::from_secs(2)).is_some());
        assert_eq!(greeter.last_greeted(), Some("Ana"));
    }

    #[test]
    fn test_suppressed_greeting_does_not_extend_cooldown() {
        let mut greeter = Greeter::new(Duration::from_secs(10), "{name}");
        let t0 = Instant::now();
        assert!(greeter.greeting("Ana", t0).is_some());
        assert!(greeter.greeting("Ana", t0 + Duration::from_secs(8)).is_none());
        assert!(greeter.greeting("Ana", t0 + Duration::from_secs(11)).is_some());
    }
}
