//! Local-first offline and sync engine for the Quill journaling & habits app.
//!
//! Three independent notions of "what is true right now" (the network, the
//! local response cache, and the local durable outbox) are reconciled here
//! under arbitrary connectivity transitions, without losing writes and
//! without duplicating server-side effects on retry.
//!
//! - [`router`] decides how every outgoing request is served and reads/writes
//!   the versioned [`cache`].
//! - [`outbox`] durably buffers write-intents made while offline; [`sync`]
//!   drains them to the backend on reconnect or a background-sync trigger.
//! - [`session`] keeps an optimistic, UI-facing mirror of a remote session
//!   that never rolls back on a failed background persist.
//! - [`push`] handles incoming notification payloads and click routing.

pub mod cache;
pub mod config;
pub mod http;
pub mod ids;
pub mod outbox;
pub mod push;
pub mod router;
pub mod session;
pub mod sync;
