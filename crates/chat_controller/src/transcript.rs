//! Display-only record of the conversation, kept by the front end.

use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    User,
    Assistant,
}

impl Author {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "you",
            Self::Assistant => "llm",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub author: Author,
    pub text: String,
    pub at: DateTime<Local>,
}

impl TranscriptEntry {
    pub fn render(&self) -> String {
        format!("[{}] {}: {}", self.at.format("%H:%M"), self.author.label(), self.text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn push(&mut self, author: Author, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            author,
            text: text.into(),
            at: Local::now(),
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_by(&self, author: Author) -> Option<&TranscriptEntry> {
        self.entries.iter().rev().find(|entry| entry.author == author)
    }
}
