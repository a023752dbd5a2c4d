//! Property-based tests for query keys and pagination cursors.
//!
//! - Keys built from the same arguments are equal whatever the insertion
//!   order, and omitted fields equal `None` fields
//! - Different arguments never give equal keys
//! - Cursors survive the URL round trip; garbage decodes to "no cursor"

use proptest::prelude::*;
use resq::cache::QueryKey;
use resq::cursor::{decode_cursor, encode_cursor, Cursor, Direction, PageState};
use serde::Serialize;
use std::collections::HashMap;

// ============================================================================
// STRATEGIES
// ============================================================================

fn arb_args() -> impl Strategy<Value = Vec<(String, i64)>> {
  prop::collection::vec(("[a-z_]{1,8}", any::<i64>()), 0..8)
}

fn arb_direction() -> impl Strategy<Value = Direction> {
  prop_oneof![Just(Direction::Forward), Just(Direction::Backward)]
}

#[derive(Serialize)]
struct Filter {
  status: Option<String>,
  limit: u32,
}

#[derive(Serialize)]
struct FilterWithoutStatus {
  limit: u32,
}

// ============================================================================
// QUERY KEYS
// ============================================================================

proptest! {
  #[test]
  fn prop_key_ignores_insertion_order(pairs in arb_args()) {
    let forward: HashMap<String, i64> = pairs.iter().cloned().collect();
    // Later duplicates win in both maps
    let mut reversed = HashMap::new();
    for (name, value) in pairs.iter().rev() {
      reversed.entry(name.clone()).or_insert(*value);
    }
    let mut expected = HashMap::new();
    for (name, value) in &pairs {
      expected.insert(name.clone(), *value);
    }
    prop_assert_eq!(&forward, &expected);

    let a = QueryKey::build("products", "list", &forward).unwrap();
    let b = QueryKey::build("products", "list", &reversed).unwrap();
    prop_assert_eq!(&a, &b);
    prop_assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn prop_key_is_deterministic(pairs in arb_args()) {
    let args: HashMap<String, i64> = pairs.into_iter().collect();
    let a = QueryKey::build("orders", "search", &args).unwrap();
    let b = QueryKey::build("orders", "search", &args).unwrap();
    prop_assert_eq!(a.to_string(), b.to_string());
  }

  #[test]
  fn prop_none_equals_omitted(limit in any::<u32>()) {
    let with_none = QueryKey::build("orders", "list", &Filter { status: None, limit }).unwrap();
    let omitted = QueryKey::build("orders", "list", &FilterWithoutStatus { limit }).unwrap();
    prop_assert_eq!(with_none, omitted);
  }

  #[test]
  fn prop_distinct_args_give_distinct_keys(a in arb_args(), b in arb_args()) {
    let a: HashMap<String, i64> = a.into_iter().collect();
    let b: HashMap<String, i64> = b.into_iter().collect();
    let key_a = QueryKey::build("products", "list", &a).unwrap();
    let key_b = QueryKey::build("products", "list", &b).unwrap();
    prop_assert_eq!(a == b, key_a == key_b);
  }

  #[test]
  fn prop_scope_and_entity_separate_keys(scope in "[a-z]{1,6}", entity in "[a-z]{1,6}") {
    let key = QueryKey::simple(&scope, &entity).unwrap();
    let other_scope = QueryKey::simple(&format!("{scope}x"), &entity).unwrap();
    let other_entity = QueryKey::simple(&scope, &format!("{entity}x")).unwrap();
    prop_assert_ne!(&key, &other_scope);
    prop_assert_ne!(&key, &other_entity);
  }
}

// ============================================================================
// CURSORS
// ============================================================================

proptest! {
  #[test]
  fn prop_cursor_round_trip(raw in "\\PC{1,64}") {
    let cursor = Cursor::new(raw).unwrap();
    let encoded = encode_cursor(Some(&cursor)).unwrap();
    prop_assert!(encoded.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    prop_assert_eq!(decode_cursor(Some(&encoded)), Some(cursor));
  }

  #[test]
  fn prop_non_alphabet_decodes_to_none(prefix in "[A-Za-z0-9]{0,8}", suffix in "[A-Za-z0-9]{0,8}") {
    let garbage = format!("{prefix}!{suffix}");
    prop_assert_eq!(decode_cursor(Some(&garbage)), None);
  }

  #[test]
  fn prop_decode_never_panics(raw in any::<String>()) {
    let _ = decode_cursor(Some(&raw));
    let _ = PageState::from_query(&raw);
  }

  #[test]
  fn prop_page_state_query_round_trip(raw in "\\PC{1,32}", direction in arb_direction()) {
    let state = PageState::new(Cursor::new(raw), direction);
    let query = state.to_query();
    prop_assert_eq!(PageState::from_query(&query), state);
  }
}
