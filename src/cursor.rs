//! Pagination cursors and the URL representation of a page position.
//!
//! Cursors are opaque tokens handed out by the remote API. They are never
//! parsed or built here, only wrapped into a URL-safe token and back.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Query-string parameter carrying the encoded cursor.
pub const CURSOR_PARAM: &str = "cursor";
/// Query-string parameter carrying the direction flag.
pub const DIRECTION_PARAM: &str = "direction";

/// Opaque position token returned by the remote API. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
  /// Wrap a token. An empty token means "no cursor".
  pub fn new(token: impl Into<String>) -> Option<Self> {
    let token = token.into();
    if token.is_empty() {
      None
    } else {
      Some(Self(token))
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Cursor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Encode a cursor for a URL. `None` stays `None` so the parameter is omitted
/// and the first page keeps a clean URL.
pub fn encode_cursor(cursor: Option<&Cursor>) -> Option<String> {
  cursor.map(|c| URL_SAFE_NO_PAD.encode(c.0.as_bytes()))
}

/// Decode a cursor from a URL. Anything absent or malformed is "no cursor";
/// this never fails because the value may come from a hand-edited URL.
pub fn decode_cursor(raw: Option<&str>) -> Option<Cursor> {
  let raw = raw?.trim();
  let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
  let token = String::from_utf8(bytes).ok()?;
  Cursor::new(token)
}

/// Which edge of the previous window was used to arrive at the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
  /// `-1`: items before the cursor
  Backward,
  /// `0`: first page
  #[default]
  Neutral,
  /// `1`: items after the cursor
  Forward,
}

impl Direction {
  /// Parse the URL flag. Anything other than `-1`, `0` or `1` is `Neutral`.
  pub fn parse(raw: Option<&str>) -> Self {
    match raw.map(str::trim) {
      Some("-1") => Direction::Backward,
      Some("1") => Direction::Forward,
      _ => Direction::Neutral,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Direction::Backward => "-1",
      Direction::Neutral => "0",
      Direction::Forward => "1",
    }
  }
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for Direction {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for Direction {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(Direction::parse(raw.as_deref()))
  }
}

/// Cursors returned alongside a list window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursors {
  pub previous: Option<Cursor>,
  pub next: Option<Cursor>,
}

/// Requested position in a collection: the only persisted pagination state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PageState {
  pub cursor: Option<Cursor>,
  pub direction: Direction,
}

impl PageState {
  /// Build a position. A direction without a cursor, or a cursor without a
  /// direction, both collapse to the first page.
  pub fn new(cursor: Option<Cursor>, direction: Direction) -> Self {
    match (cursor, direction) {
      (Some(cursor), Direction::Forward | Direction::Backward) => Self {
        cursor: Some(cursor),
        direction,
      },
      _ => Self::first(),
    }
  }

  pub fn first() -> Self {
    Self {
      cursor: None,
      direction: Direction::Neutral,
    }
  }

  pub fn is_first(&self) -> bool {
    self.cursor.is_none()
  }

  /// Render as `cursor=...&direction=...`; empty for the first page.
  pub fn to_query(&self) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    if let Some(token) = encode_cursor(self.cursor.as_ref()) {
      query.append_pair(CURSOR_PARAM, &token);
      query.append_pair(DIRECTION_PARAM, self.direction.as_str());
    }
    query.finish()
  }

  /// Read the position back from a query string (leading `?` allowed).
  /// Unknown parameters are ignored; bad values fall back to the first page.
  pub fn from_query(query: &str) -> Self {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut cursor = None;
    let mut direction = None;

    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
      match name.as_ref() {
        CURSOR_PARAM => cursor = decode_cursor(Some(&value)),
        DIRECTION_PARAM => direction = Some(Direction::parse(Some(&value))),
        _ => {}
      }
    }

    Self::new(cursor, direction.unwrap_or_default())
  }
}

/// Cursors at both edges of the window currently on screen, plus how we got
/// here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationWindow {
  pub previous: Option<Cursor>,
  pub next: Option<Cursor>,
  pub direction: Direction,
}

impl PaginationWindow {
  pub fn new(cursors: &PageCursors, direction: Direction) -> Self {
    Self {
      previous: cursors.previous.clone(),
      next: cursors.next.clone(),
      direction,
    }
  }

  pub fn has_next(&self) -> bool {
    self.next.is_some()
  }

  pub fn has_previous(&self) -> bool {
    self.previous.is_some()
  }

  /// Position of the window after this one, if any.
  pub fn next_page(&self) -> Option<PageState> {
    self
      .next
      .clone()
      .map(|cursor| PageState::new(Some(cursor), Direction::Forward))
  }

  /// Position of the window before this one, if any.
  pub fn previous_page(&self) -> Option<PageState> {
    self
      .previous
      .clone()
      .map(|cursor| PageState::new(Some(cursor), Direction::Backward))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cursor(s: &str) -> Cursor {
    Cursor::new(s).unwrap()
  }

  #[test]
  fn test_none_encodes_to_none() {
    assert_eq!(encode_cursor(None), None);
    assert_eq!(decode_cursor(None), None);
  }

  #[test]
  fn test_round_trip() {
    for raw in ["c1", "eyJsYXN0X2lkIjo0Mn0=", "a b/c?d=e&f", "ünïcödé"] {
      let c = cursor(raw);
      let encoded = encode_cursor(Some(&c)).unwrap();
      assert!(!encoded.contains('='));
      assert_eq!(decode_cursor(Some(&encoded)), Some(c));
    }
  }

  #[test]
  fn test_garbage_decodes_to_none() {
    assert_eq!(decode_cursor(Some("")), None);
    assert_eq!(decode_cursor(Some("!!!not base64!!!")), None);
    assert_eq!(decode_cursor(Some("%%%")), None);
    // Valid base64, not UTF-8
    assert_eq!(decode_cursor(Some("_w")), None);
  }

  #[test]
  fn test_empty_cursor_is_no_cursor() {
    assert_eq!(Cursor::new(""), None);
  }

  #[test]
  fn test_direction_parse() {
    assert_eq!(Direction::parse(Some("-1")), Direction::Backward);
    assert_eq!(Direction::parse(Some("0")), Direction::Neutral);
    assert_eq!(Direction::parse(Some("1")), Direction::Forward);
    assert_eq!(Direction::parse(Some("2")), Direction::Neutral);
    assert_eq!(Direction::parse(Some("forward")), Direction::Neutral);
    assert_eq!(Direction::parse(None), Direction::Neutral);
  }

  #[test]
  fn test_first_page_query_is_empty() {
    assert_eq!(PageState::first().to_query(), "");
    assert_eq!(PageState::from_query(""), PageState::first());
  }

  #[test]
  fn test_query_round_trip() {
    let state = PageState::new(Some(cursor("c1")), Direction::Forward);
    let query = state.to_query();
    assert!(query.contains("direction=1"));
    assert_eq!(PageState::from_query(&format!("?{query}")), state);
  }

  #[test]
  fn test_edited_query_falls_back() {
    let state = PageState::from_query("cursor=%%%&direction=7&tab=orders");
    assert_eq!(state, PageState::first());

    let encoded = encode_cursor(Some(&cursor("c1"))).unwrap();
    let state = PageState::from_query(&format!("cursor={encoded}&direction=9"));
    assert!(state.is_first());
  }

  #[test]
  fn test_window_navigation() {
    let page_one = PaginationWindow::new(
      &PageCursors {
        previous: None,
        next: Some(cursor("c1")),
      },
      Direction::Neutral,
    );
    assert!(!page_one.has_previous());
    assert_eq!(page_one.previous_page(), None);

    let next = page_one.next_page().unwrap();
    assert_eq!(next.direction, Direction::Forward);
    assert_eq!(next.cursor, Some(cursor("c1")));

    let page_two = PaginationWindow::new(
      &PageCursors {
        previous: Some(cursor("c2-start")),
        next: Some(cursor("c2-end")),
      },
      next.direction,
    );
    let back = page_two.previous_page().unwrap();
    assert_eq!(back.direction, Direction::Backward);
    assert_eq!(back.cursor, Some(cursor("c2-start")));
  }

  #[test]
  fn test_direction_serializes_as_flag() {
    let state = PageState::new(Some(cursor("c1")), Direction::Backward);
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["direction"], "-1");
    assert_eq!(value["cursor"], "c1");
  }
}
