//! Optimistic local session state.
//!
//! The in-memory message list is the UI's only read model: appends land there
//! first and are mirrored to the backend in the background. Remote state is
//! always a subset of what is displayed; a failed background persist never
//! rolls the display back, it only means the message will be missing on
//! another device until it is re-sent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::ApiConfig;
use crate::ids::local_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
  pub id: String,
  pub role: Role,
  pub content: String,
  pub created_at: DateTime<Utc>,
  /// True until the backend confirms persistence. The seeded welcome message
  /// stays pending forever; it is never persisted.
  #[serde(default)]
  pub pending: bool,
}

/// The remote session store, specified only at this boundary. The managed
/// backend behind it is an external collaborator.
#[async_trait]
pub trait SessionStore: Send + Sync {
  async fn create_session(&self) -> Result<String>;
  async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>>;
  async fn persist_message(&self, session_id: &str, message: &Message) -> Result<()>;
  /// Bump the session's last-activity timestamp.
  async fn touch_session(&self, session_id: &str) -> Result<()>;
}

/// Session store backed by the managed backend's HTTP API.
pub struct HttpSessionStore {
  client: reqwest::Client,
  sessions_url: String,
}

impl HttpSessionStore {
  pub fn new(api: &ApiConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      sessions_url: api.endpoint_url(&api.session_endpoint),
    }
  }

  fn session_url(&self, session_id: &str, suffix: &str) -> String {
    format!("{}/{}{}", self.sessions_url, session_id, suffix)
  }
}

#[derive(Deserialize)]
struct CreatedSession {
  id: String,
}

#[async_trait]
impl SessionStore for HttpSessionStore {
  async fn create_session(&self) -> Result<String> {
    let response = self
      .client
      .post(&self.sessions_url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to create session: {}", e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Backend refused session creation: status {}",
        response.status()
      ));
    }

    let created: CreatedSession = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse created session: {}", e))?;
    Ok(created.id)
  }

  async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
    let url = self.session_url(session_id, "/messages");
    let response = self
      .client
      .get(&url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to load messages for {}: {}", session_id, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Failed to load messages for {}: status {}",
        session_id,
        response.status()
      ));
    }

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse messages for {}: {}", session_id, e))
  }

  async fn persist_message(&self, session_id: &str, message: &Message) -> Result<()> {
    let url = self.session_url(session_id, "/messages");
    let response = self
      .client
      .post(&url)
      .json(message)
      .send()
      .await
      .map_err(|e| eyre!("Failed to persist {}: {}", message.id, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Backend rejected {}: status {}",
        message.id,
        response.status()
      ));
    }

    Ok(())
  }

  async fn touch_session(&self, session_id: &str) -> Result<()> {
    let url = self.session_url(session_id, "/touch");
    let response = self
      .client
      .post(&url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to touch session {}: {}", session_id, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Failed to touch session {}: status {}",
        session_id,
        response.status()
      ));
    }

    Ok(())
  }
}

/// Durable pointer to the active session: one row in the local store, so a
/// restart resumes the session that was active when the process ended.
pub struct PointerStore {
  conn: StdMutex<Connection>,
}

/// Schema for the active-session pointer. The CHECK pins the table to a
/// single row.
const POINTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_pointer (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    session_id TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl PointerStore {
  /// Open or create the pointer store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create pointer directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open pointer database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// In-memory pointer store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory pointer store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(POINTER_SCHEMA)
      .map_err(|e| eyre!("Failed to run pointer migrations: {}", e))?;

    Ok(Self {
      conn: StdMutex::new(conn),
    })
  }

  /// Record `session_id` as the active session, replacing any previous one.
  pub fn save(&self, session_id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO session_pointer (slot, session_id, updated_at)
         VALUES (0, ?, datetime('now'))",
        params![session_id],
      )
      .map_err(|e| eyre!("Failed to persist session pointer: {}", e))?;

    Ok(())
  }

  /// The session id persisted by a previous run, if any.
  pub fn load(&self) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row("SELECT session_id FROM session_pointer WHERE slot = 0", [], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read session pointer: {}", e))
  }
}

const WELCOME_TEXT: &str =
  "Welcome back. What would you like to reflect on today?";

struct Inner {
  session_id: Option<String>,
  messages: Vec<Message>,
}

/// UI-facing mirror of a remote session.
pub struct LocalSession<S: SessionStore + 'static> {
  store: Arc<S>,
  /// Durable active-session pointer, when the caller wants restarts to
  /// resume where they left off
  pointer: Option<Arc<PointerStore>>,
  inner: Arc<Mutex<Inner>>,
  /// Single-flight guard for session creation
  creation_guard: Arc<Mutex<()>>,
}

impl<S: SessionStore + 'static> Clone for LocalSession<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      pointer: self.pointer.clone(),
      inner: Arc::clone(&self.inner),
      creation_guard: Arc::clone(&self.creation_guard),
    }
  }
}

impl<S: SessionStore + 'static> LocalSession<S> {
  pub fn new(store: S) -> Self {
    Self {
      store: Arc::new(store),
      pointer: None,
      inner: Arc::new(Mutex::new(Inner {
        session_id: None,
        messages: Vec::new(),
      })),
      creation_guard: Arc::new(Mutex::new(())),
    }
  }

  /// Persist the active-session pointer to `pointer` so [`resume`] works
  /// across restarts.
  ///
  /// [`resume`]: LocalSession::resume
  pub fn with_pointer(mut self, pointer: Arc<PointerStore>) -> Self {
    self.pointer = Some(pointer);
    self
  }

  /// Activate the session persisted by a previous run, if any.
  pub async fn resume(&self) -> Result<Option<String>> {
    let persisted = match &self.pointer {
      Some(pointer) => pointer.load()?,
      None => None,
    };

    match persisted {
      Some(id) => {
        self.activate(&id).await?;
        Ok(Some(id))
      }
      None => Ok(None),
    }
  }

  /// Switch to `session_id`, replacing the in-memory list with whatever the
  /// backend has. An empty session is seeded with a local-only welcome
  /// message.
  pub async fn activate(&self, session_id: &str) -> Result<()> {
    let mut messages = self.store.load_messages(session_id).await?;
    if messages.is_empty() {
      messages.push(welcome_message());
    }

    {
      let mut inner = self.inner.lock().await;
      inner.session_id = Some(session_id.to_string());
      inner.messages = messages;
    }

    self.save_pointer(session_id);
    Ok(())
  }

  /// Append a message to the display list immediately, then persist it in the
  /// background. The returned message is already visible to the UI; if the
  /// background persist fails it stays visible and stays pending.
  pub async fn add_message(&self, role: Role, content: &str) -> Result<Message> {
    let session_id = self.ensure_session().await?;

    let message = Message {
      id: local_id(),
      role,
      content: content.to_string(),
      created_at: Utc::now(),
      pending: true,
    };

    {
      let mut inner = self.inner.lock().await;
      inner.messages.push(message.clone());
    }

    let store = Arc::clone(&self.store);
    let inner = Arc::clone(&self.inner);
    let persisted = message.clone();
    tokio::spawn(async move {
      match store.persist_message(&session_id, &persisted).await {
        Ok(()) => {
          if let Err(err) = store.touch_session(&session_id).await {
            warn!(%err, "could not bump session activity");
          }
          let mut inner = inner.lock().await;
          if let Some(confirmed) = inner.messages.iter_mut().find(|m| m.id == persisted.id) {
            confirmed.pending = false;
          }
        }
        Err(err) => {
          // Swallowed: local display state never rolls back
          warn!(id = %persisted.id, %err, "background persist failed");
        }
      }
    });

    Ok(message)
  }

  /// Snapshot of the display list.
  pub async fn messages(&self) -> Vec<Message> {
    self.inner.lock().await.messages.clone()
  }

  pub async fn session_id(&self) -> Option<String> {
    self.inner.lock().await.session_id.clone()
  }

  /// Return the current session id, creating a session if none is active.
  ///
  /// Creation is single-flight: a concurrent caller that also finds no
  /// current session waits on the guard and reuses the session the first
  /// caller created instead of racing a second row into existence.
  async fn ensure_session(&self) -> Result<String> {
    if let Some(id) = self.inner.lock().await.session_id.clone() {
      return Ok(id);
    }

    let _creating = self.creation_guard.lock().await;

    // Re-check: the creation we were waiting on may have finished
    if let Some(id) = self.inner.lock().await.session_id.clone() {
      return Ok(id);
    }

    let id = self.store.create_session().await?;
    self.inner.lock().await.session_id = Some(id.clone());
    self.save_pointer(&id);
    Ok(id)
  }

  /// Best-effort pointer write: a local-store failure here must not fail the
  /// session operation, it only costs resume-after-restart.
  fn save_pointer(&self, session_id: &str) {
    if let Some(pointer) = &self.pointer {
      if let Err(err) = pointer.save(session_id) {
        warn!(%err, "could not persist active-session pointer");
      }
    }
  }
}

fn welcome_message() -> Message {
  Message {
    id: local_id(),
    role: Role::Assistant,
    content: WELCOME_TEXT.to_string(),
    created_at: Utc::now(),
    pending: true,
  }
}
