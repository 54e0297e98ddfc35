use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who produced a transcript delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Speaker {
    User,
    Model,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "User"),
            Speaker::Model => write!(f, "AI"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Ordered utterance list assembled from streamed deltas.
///
/// A delta from the same speaker as the previous one extends that utterance;
/// a delta from a different speaker (or the first of a session) starts a new
/// entry.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delta(&mut self, speaker: Speaker, delta: &str) {
        match self.entries.last_mut() {
            Some(last) if last.speaker == speaker => {
                last.text.push_str(delta);
            }
            _ => {
                self.entries.push(TranscriptEntry {
                    speaker,
                    text: delta.to_string(),
                    at: Utc::now(),
                });
            }
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Rendered `"Speaker: text"` lines in order.
    pub fn rendered(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{}: {}", e.speaker, e.text))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_speaker_deltas_merge_into_one_utterance() {
        let mut log = TranscriptLog::new();
        log.push_delta(Speaker::User, "Hel");
        log.push_delta(Speaker::User, "lo");
        log.push_delta(Speaker::Model, "Hi");
        assert_eq!(log.rendered(), vec!["User: Hello", "AI: Hi"]);
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn speaker_alternation_starts_new_entries() {
        let mut log = TranscriptLog::new();
        log.push_delta(Speaker::User, "one");
        log.push_delta(Speaker::Model, "two");
        log.push_delta(Speaker::User, "three");
        assert_eq!(log.entries().len(), 3);
    }

    #[test]
    fn first_delta_opens_an_entry() {
        let mut log = TranscriptLog::new();
        log.push_delta(Speaker::Model, "Hi there");
        assert_eq!(log.rendered(), vec!["AI: Hi there"]);
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = TranscriptLog::new();
        log.push_delta(Speaker::User, "x");
        log.clear();
        assert!(log.entries().is_empty());
    }
}
