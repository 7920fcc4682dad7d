//! In-memory conversation context per session.
//!
//! Holds the most recent completed turns of each session so the backend can
//! answer in context. Nothing is persisted; a restart forgets everything.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::llm::Turn;
use crate::protocol::SessionId;

/// Default number of turns kept per session.
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Default number of sessions whose context is kept.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

struct SessionTurns {
    turns: VecDeque<Turn>,
    last_used: Instant,
}

struct Inner {
    sessions: DashMap<SessionId, SessionTurns>,
    max_turns: usize,
    max_sessions: usize,
}

/// Recent turns per session, bounded in both directions.
///
/// Each session keeps at most `max_turns` turns, oldest dropped first. When a
/// new session would exceed `max_sessions`, the least recently used session
/// is forgotten. `max_turns == 0` disables the store. Cheap to clone.
#[derive(Clone)]
pub struct ConversationHistory {
    inner: Arc<Inner>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS, DEFAULT_MAX_SESSIONS)
    }
}

impl ConversationHistory {
    #[must_use]
    pub fn new(max_turns: usize, max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                max_turns,
                max_sessions: max_sessions.max(1),
            }),
        }
    }

    /// A store that never keeps anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, 1)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.max_turns > 0
    }

    /// Snapshot of the turns recorded for `session_id`, oldest first.
    pub fn turns(&self, session_id: &SessionId) -> Vec<Turn> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| entry.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a completed turn to `session_id`.
    pub fn record(&self, session_id: &SessionId, turn: Turn) {
        if !self.is_enabled() {
            return;
        }

        if !self.inner.sessions.contains_key(session_id) {
            self.make_room();
        }

        let mut entry = self
            .inner
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionTurns {
                turns: VecDeque::with_capacity(self.inner.max_turns),
                last_used: Instant::now(),
            });
        entry.turns.push_back(turn);
        while entry.turns.len() > self.inner.max_turns {
            entry.turns.pop_front();
        }
        entry.last_used = Instant::now();
    }

    /// Drop everything recorded for `session_id`.
    pub fn forget(&self, session_id: &SessionId) -> bool {
        self.inner.sessions.remove(session_id).is_some()
    }

    /// Number of sessions with recorded turns.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    fn make_room(&self) {
        while self.inner.sessions.len() >= self.inner.max_sessions {
            let oldest = self
                .inner
                .sessions
                .iter()
                .min_by_key(|entry| entry.last_used)
                .map(|entry| entry.key().clone());
            let Some(oldest) = oldest else {
                return;
            };
            self.inner.sessions.remove(&oldest);
            debug!(session_id = %oldest, "Evicted conversation history");
        }
    }
}
