//! Session-scoped, append-only conversation history.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection};

use crate::domain::{now_rfc3339_utc, ConversationTurn};
use crate::error::AppError;

pub trait ConversationMemory: Send + Sync {
    fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<(), AppError>;

    /// The last `max_turns` turns of the session, oldest first.
    fn history(&self, session_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>, AppError>;

    /// Drop a session entirely. Returns the number of turns removed.
    fn evict(&self, session_id: &str) -> Result<u32, AppError>;
}

impl ConversationTurn {
    pub fn now(question: impl Into<String>, answer: impl Into<String>) -> Result<Self, AppError> {
        Ok(Self {
            question: question.into(),
            answer: answer.into(),
            timestamp: now_rfc3339_utc()?,
        })
    }
}

fn validate_session_id(session_id: &str) -> Result<(), AppError> {
    if session_id.trim().is_empty() {
        return Err(AppError::new(
            "MEMORY_SESSION_INVALID",
            "Session id must not be empty",
        ));
    }
    Ok(())
}

fn lock_poisoned() -> AppError {
    AppError::new("MEMORY_LOCK_POISONED", "Conversation memory lock poisoned")
}

#[derive(Debug, Default)]
pub struct InMemoryConversationMemory {
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl InMemoryConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationMemory for InMemoryConversationMemory {
    fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<(), AppError> {
        validate_session_id(session_id)?;
        let mut sessions = self.sessions.write().map_err(|_| lock_poisoned())?;
        sessions.entry(session_id.to_string()).or_default().push(turn);
        Ok(())
    }

    fn history(&self, session_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>, AppError> {
        validate_session_id(session_id)?;
        let sessions = self.sessions.read().map_err(|_| lock_poisoned())?;
        let Some(turns) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let start = turns.len().saturating_sub(max_turns);
        Ok(turns[start..].to_vec())
    }

    fn evict(&self, session_id: &str) -> Result<u32, AppError> {
        let mut sessions = self.sessions.write().map_err(|_| lock_poisoned())?;
        Ok(sessions
            .remove(session_id)
            .map(|t| t.len().min(u32::MAX as usize) as u32)
            .unwrap_or(0))
    }
}

/// Turns persisted in SQLite so sessions survive restarts.
#[derive(Debug)]
pub struct SqliteConversationMemory {
    conn: Mutex<Connection>,
}

impl SqliteConversationMemory {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let mut conn = crate::db::open(path)?;
        crate::db::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let mut conn = crate::db::open_in_memory()?;
        crate::db::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ConversationMemory for SqliteConversationMemory {
    fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<(), AppError> {
        validate_session_id(session_id)?;
        let conn = self.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO conversation_turns(session_id, question, answer, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, turn.question, turn.answer, turn.timestamp],
        )
        .map_err(|e| {
            AppError::new("MEMORY_WRITE_FAILED", "Failed to append conversation turn")
                .with_details(e.to_string())
        })?;
        Ok(())
    }

    fn history(&self, session_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>, AppError> {
        validate_session_id(session_id)?;
        if max_turns == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                r#"
      SELECT question, answer, created_at
      FROM conversation_turns
      WHERE session_id = ?1
      ORDER BY id DESC
      LIMIT ?2
      "#,
            )
            .map_err(|e| {
                AppError::new("MEMORY_QUERY_FAILED", "Failed to prepare history query")
                    .with_details(e.to_string())
            })?;
        let limit = max_turns.min(i64::MAX as usize) as i64;
        let rows = stmt
            .query_map(params![session_id, limit], |row| {
                Ok(ConversationTurn {
                    question: row.get(0)?,
                    answer: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })
            .map_err(|e| {
                AppError::new("MEMORY_QUERY_FAILED", "Failed to query history")
                    .with_details(e.to_string())
            })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(|e| {
                AppError::new("MEMORY_QUERY_FAILED", "Failed to decode history row")
                    .with_details(e.to_string())
            })?);
        }
        out.reverse();
        Ok(out)
    }

    fn evict(&self, session_id: &str) -> Result<u32, AppError> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned())?;
        let n = conn
            .execute(
                "DELETE FROM conversation_turns WHERE session_id = ?1",
                [session_id],
            )
            .map_err(|e| {
                AppError::new("MEMORY_WRITE_FAILED", "Failed to evict session")
                    .with_details(e.to_string())
            })?;
        Ok(n.min(u32::MAX as usize) as u32)
    }
}
