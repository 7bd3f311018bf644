//! Push notification payloads and click routing.
//!
//! This subsystem consumes payloads, it does not produce them: on receipt a
//! notification is shown, and on click an existing same-origin window is
//! focused (optionally navigated) or a new one is opened.

use serde::Deserialize;
use url::Url;

/// Payload shape dispatched by the backend push service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub tag: Option<String>,
  #[serde(default)]
  pub data: PushData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushData {
  pub url: Option<String>,
}

/// A notification ready to display, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub tag: Option<String>,
  pub url: Option<String>,
}

impl Notification {
  pub fn from_payload(payload: PushPayload) -> Self {
    Self {
      title: payload.title.unwrap_or_else(|| "Quill".to_string()),
      body: payload.body.unwrap_or_default(),
      tag: payload.tag,
      url: payload.data.url,
    }
  }
}

/// An open UI window the click handler can act on.
#[derive(Debug, Clone)]
pub struct ClientWindow {
  pub id: String,
  pub url: String,
}

/// What the click handler should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
  /// Focus an existing window, optionally navigating it first
  Focus {
    client_id: String,
    navigate_to: Option<String>,
  },
  /// No window on our origin is open; open a new one
  Open { url: String },
}

/// Resolve a notification click against the currently open windows.
pub fn resolve_click(clients: &[ClientWindow], origin: &str, target: Option<&str>) -> ClickAction {
  for client in clients {
    if same_origin(&client.url, origin) {
      return ClickAction::Focus {
        client_id: client.id.clone(),
        navigate_to: target.map(String::from),
      };
    }
  }

  ClickAction::Open {
    url: target.unwrap_or("/").to_string(),
  }
}

fn same_origin(url: &str, origin: &str) -> bool {
  match (Url::parse(url), Url::parse(origin)) {
    (Ok(a), Ok(b)) => a.origin() == b.origin(),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const ORIGIN: &str = "https://app.quill.example";

  #[test]
  fn test_payload_defaults() {
    let payload: PushPayload = serde_json::from_str(r#"{"body": "Time to journal"}"#).unwrap();
    let notification = Notification::from_payload(payload);

    assert_eq!(notification.title, "Quill");
    assert_eq!(notification.body, "Time to journal");
    assert_eq!(notification.tag, None);
    assert_eq!(notification.url, None);
  }

  #[test]
  fn test_payload_with_target_url() {
    let payload: PushPayload = serde_json::from_str(
      r#"{"title": "Streak!", "tag": "habit-streak", "data": {"url": "/habits/water"}}"#,
    )
    .unwrap();
    let notification = Notification::from_payload(payload);

    assert_eq!(notification.title, "Streak!");
    assert_eq!(notification.tag.as_deref(), Some("habit-streak"));
    assert_eq!(notification.url.as_deref(), Some("/habits/water"));
  }

  #[test]
  fn test_click_focuses_existing_same_origin_window() {
    let clients = vec![
      ClientWindow {
        id: "other".to_string(),
        url: "https://elsewhere.example/page".to_string(),
      },
      ClientWindow {
        id: "ours".to_string(),
        url: "https://app.quill.example/journal".to_string(),
      },
    ];

    let action = resolve_click(&clients, ORIGIN, Some("/habits/water"));
    assert_eq!(
      action,
      ClickAction::Focus {
        client_id: "ours".to_string(),
        navigate_to: Some("/habits/water".to_string()),
      }
    );
  }

  #[test]
  fn test_click_opens_new_window_when_none_match() {
    let clients = vec![ClientWindow {
      id: "other".to_string(),
      url: "https://elsewhere.example/page".to_string(),
    }];

    let action = resolve_click(&clients, ORIGIN, Some("/journal"));
    assert_eq!(action, ClickAction::Open { url: "/journal".to_string() });

    let action = resolve_click(&[], ORIGIN, None);
    assert_eq!(action, ClickAction::Open { url: "/".to_string() });
  }
}
