/// Browse-prompt commands and resource name autocomplete
use serde_json::Value;

use crate::api::types::Resource;

#[derive(Debug, Clone)]
pub struct ResourceCommand {
  pub resource: Resource,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

impl ResourceCommand {
  pub fn name(&self) -> &'static str {
    self.resource.route()
  }
}

/// All browsable resources
pub const RESOURCES: &[ResourceCommand] = &[
  ResourceCommand {
    resource: Resource::Products,
    aliases: &["p", "product", "prod"],
    description: "Catalog products",
  },
  ResourceCommand {
    resource: Resource::Customers,
    aliases: &["c", "customer", "cust"],
    description: "Customer accounts",
  },
  ResourceCommand {
    resource: Resource::Orders,
    aliases: &["o", "order"],
    description: "Placed orders",
  },
  ResourceCommand {
    resource: Resource::Collections,
    aliases: &["col", "collection"],
    description: "Product collections",
  },
  ResourceCommand {
    resource: Resource::DraftOrders,
    aliases: &["d", "draft", "drafts"],
    description: "Draft orders",
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static ResourceCommand> {
  let input_lower = input.trim().to_lowercase();

  if input_lower.is_empty() {
    return RESOURCES.iter().collect();
  }

  let mut matches: Vec<(&ResourceCommand, u32)> = Vec::new();

  for cmd in RESOURCES {
    let name = cmd.name();

    // Exact match on name
    if name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Best match for a resource name, alias or fragment. Empty input matches
/// nothing.
pub fn resolve_resource(input: &str) -> Option<Resource> {
  if input.trim().is_empty() {
    return None;
  }
  get_suggestions(input).first().map(|cmd| cmd.resource)
}

/// One line typed at the browse prompt
#[derive(Debug, Clone, PartialEq)]
pub enum PromptCommand {
  /// Following list window
  Next,
  /// Preceding list window
  Previous,
  /// Open the n-th item of the current window (1-based)
  Open(usize),
  /// Open an item by id
  Get(String),
  /// Pop the current view
  Back,
  /// Refetch the current view, ignoring freshness
  Refresh,
  /// Search the current resource; `None` clears the search
  Search(Option<String>),
  /// Switch to another resource (`:orders`)
  Switch(String),
  /// Update one field of the open item
  Set { field: String, value: Value },
  Help,
  Quit,
  /// Blank line: redraw
  Redraw,
  Unknown(String),
}

/// Parse a prompt line.
///
/// A bare number opens that item, `/term` searches, `:name` switches
/// resource, `set field=value` edits the open item.
pub fn parse_command(line: &str) -> PromptCommand {
  let line = line.trim();
  if line.is_empty() {
    return PromptCommand::Redraw;
  }

  if let Some(term) = line.strip_prefix('/') {
    let term = term.trim();
    return PromptCommand::Search((!term.is_empty()).then(|| term.to_string()));
  }

  if let Some(name) = line.strip_prefix(':') {
    return PromptCommand::Switch(name.trim().to_string());
  }

  if let Ok(n) = line.parse::<usize>() {
    return PromptCommand::Open(n);
  }

  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };

  match (word.to_lowercase().as_str(), rest) {
    ("n" | "next", "") => PromptCommand::Next,
    ("p" | "prev" | "previous", "") => PromptCommand::Previous,
    ("b" | "back", "") => PromptCommand::Back,
    ("r" | "refresh", "") => PromptCommand::Refresh,
    ("h" | "help" | "?", "") => PromptCommand::Help,
    ("q" | "quit" | "exit", "") => PromptCommand::Quit,
    ("o" | "open", n) => match n.parse() {
      Ok(n) => PromptCommand::Open(n),
      Err(_) => PromptCommand::Unknown(line.to_string()),
    },
    ("g" | "get", id) if !id.is_empty() => PromptCommand::Get(id.to_string()),
    ("set", assignment) => match parse_assignment(assignment) {
      Some((field, value)) => PromptCommand::Set { field, value },
      None => PromptCommand::Unknown(line.to_string()),
    },
    _ => PromptCommand::Unknown(line.to_string()),
  }
}

/// `field=value`. The value is read as JSON when it parses as JSON, so
/// `price=12.5` stays a number and `tags=["a"]` an array; anything else is a
/// string.
pub fn parse_assignment(input: &str) -> Option<(String, Value)> {
  let (field, value) = input.split_once('=')?;
  let field = field.trim();
  if field.is_empty() {
    return None;
  }
  let value = value.trim();
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Some((field.to_string(), value))
}

pub const HELP: &str = "\
  n, next          following page
  p, prev          preceding page
  <n>, open <n>    open the n-th item
  get <id>         open an item by id
  b, back          close the current view
  r, refresh       refetch the current view
  /term            search (a bare / clears it)
  :resource        switch resource (products, customers, orders, ...)
  set field=value  update a field of the open item
  q, quit          exit";
