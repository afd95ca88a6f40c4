//! Chunked upload session state machine
//!
//! A session tracks one large file being uploaded in independently-hashed
//! pieces: INITIALIZING -> UPLOADING -> FINALIZING -> COMPLETE, with ABORTED
//! reachable from any non-terminal state. Assembly failure rolls FINALIZING
//! back to UPLOADING so the client can retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use stemway_common::{Error, Result};
use uuid::Uuid;

/// Upload session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Session created, chunk directory not yet ready
    Initializing,
    /// Accepting chunks
    Uploading,
    /// All chunks present, assembly in progress
    Finalizing,
    /// Assembled file written and verified
    Complete,
    /// Partial data discarded at client request
    Aborted,
}

impl UploadState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Initializing, Uploading)
                | (Uploading, Finalizing)
                | (Finalizing, Complete)
                | (Finalizing, Uploading)
                | (Initializing, Aborted)
                | (Uploading, Aborted)
                | (Finalizing, Aborted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadState::Initializing => "initializing",
            UploadState::Uploading => "uploading",
            UploadState::Finalizing => "finalizing",
            UploadState::Complete => "complete",
            UploadState::Aborted => "aborted",
        }
    }
}

/// Chunked upload session (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier
    pub session_id: Uuid,

    /// Opaque caller-supplied owner id (no auth semantics)
    pub user_id: String,

    /// Sanitized destination filename
    pub filename: String,

    /// Declared total size of the assembled file, in bytes
    pub total_size: u64,

    /// Size of every chunk except possibly the last, in bytes
    pub chunk_size: u64,

    /// Expected chunk count: ceil(total_size / chunk_size)
    pub total_chunks: u32,

    /// Indices accepted so far
    pub received: BTreeSet<u32>,

    /// Verified hash per accepted index
    pub chunk_hashes: HashMap<u32, String>,

    /// Current lifecycle state
    pub state: UploadState,

    /// Session creation time
    pub created_at: DateTime<Utc>,

    /// Last accepted chunk or state change
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new session in `Initializing` state
    pub fn new(user_id: String, filename: String, total_size: u64, chunk_size: u64) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            filename,
            total_size,
            chunk_size,
            total_chunks: Self::expected_chunks(total_size, chunk_size),
            received: BTreeSet::new(),
            chunk_hashes: HashMap::new(),
            state: UploadState::Initializing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expected chunk count for a given size split
    pub fn expected_chunks(total_size: u64, chunk_size: u64) -> u32 {
        total_size.div_ceil(chunk_size) as u32
    }

    /// Expected byte length of a given chunk index (the last may be short)
    pub fn expected_chunk_len(&self, index: u32) -> u64 {
        if index + 1 == self.total_chunks {
            self.total_size - self.chunk_size * u64::from(index)
        } else {
            self.chunk_size
        }
    }

    /// Record an accepted chunk with its verified hash
    pub fn record_chunk(&mut self, index: u32, hash: String) {
        self.received.insert(index);
        self.chunk_hashes.insert(index, hash);
        self.updated_at = Utc::now();
    }

    /// Whether this index has already been accepted
    pub fn is_received(&self, index: u32) -> bool {
        self.received.contains(&index)
    }

    /// Indices in `[0, total_chunks)` not yet accepted
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    /// Whether every expected index has been accepted
    pub fn is_complete_set(&self) -> bool {
        self.received.len() == self.total_chunks as usize
    }

    /// Transition to a new state, rejecting illegal moves
    pub fn transition_to(&mut self, next: UploadState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the session is finished (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, UploadState::Complete | UploadState::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u64, chunk: u64) -> UploadSession {
        UploadSession::new("user-1".to_string(), "mix.wav".to_string(), total, chunk)
    }

    #[test]
    fn expected_chunks_rounds_up() {
        assert_eq!(UploadSession::expected_chunks(300, 100), 3);
        assert_eq!(UploadSession::expected_chunks(301, 100), 4);
        assert_eq!(UploadSession::expected_chunks(99, 100), 1);
    }

    #[test]
    fn last_chunk_may_be_short() {
        let s = session(250, 100);
        assert_eq!(s.total_chunks, 3);
        assert_eq!(s.expected_chunk_len(0), 100);
        assert_eq!(s.expected_chunk_len(1), 100);
        assert_eq!(s.expected_chunk_len(2), 50);
    }

    #[test]
    fn missing_chunks_tracks_received_set() {
        let mut s = session(300, 100);
        assert_eq!(s.missing_chunks(), vec![0, 1, 2]);
        s.record_chunk(1, "abc".to_string());
        assert_eq!(s.missing_chunks(), vec![0, 2]);
        assert!(!s.is_complete_set());
        s.record_chunk(0, "def".to_string());
        s.record_chunk(2, "ghi".to_string());
        assert!(s.is_complete_set());
        assert!(s.missing_chunks().is_empty());
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = session(300, 100);
        assert!(s.transition_to(UploadState::Uploading).is_ok());
        assert!(s.transition_to(UploadState::Finalizing).is_ok());
        assert!(s.transition_to(UploadState::Complete).is_ok());
        assert!(s.is_terminal());
    }

    #[test]
    fn finalizing_rolls_back_to_uploading() {
        let mut s = session(300, 100);
        s.transition_to(UploadState::Uploading).unwrap();
        s.transition_to(UploadState::Finalizing).unwrap();
        assert!(s.transition_to(UploadState::Uploading).is_ok());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut s = session(300, 100);
        s.transition_to(UploadState::Uploading).unwrap();
        s.transition_to(UploadState::Aborted).unwrap();
        assert!(s.transition_to(UploadState::Uploading).is_err());
        assert!(s.transition_to(UploadState::Complete).is_err());
    }

    #[test]
    fn cannot_skip_finalizing() {
        let mut s = session(300, 100);
        s.transition_to(UploadState::Uploading).unwrap();
        assert!(s.transition_to(UploadState::Complete).is_err());
    }
}
