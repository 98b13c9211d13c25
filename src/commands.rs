//! CLI commands, alias resolution and execution.

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};

use crudcache::{EntityApi, EntityId, QueryKey};

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "list",
    aliases: &["ls", "page"],
    description: "Fetch one page (--page, --size, --example)",
  },
  Command {
    name: "all",
    aliases: &["la", "list-all"],
    description: "Fetch the whole collection (--example)",
  },
  Command {
    name: "get",
    aliases: &["show"],
    description: "Fetch one entity: get ID",
  },
  Command {
    name: "create",
    aliases: &["new", "add"],
    description: "Create an entity: create JSON",
  },
  Command {
    name: "update",
    aliases: &["edit", "patch"],
    description: "Update an entity: update ID JSON",
  },
  Command {
    name: "delete",
    aliases: &["rm", "del"],
    description: "Delete an entity: delete ID",
  },
  Command {
    name: "cached",
    aliases: &["peek"],
    description: "Print the cached entity without a request: cached ID",
  },
  Command {
    name: "clear-cache",
    aliases: &["purge"],
    description: "Drop every cached entry",
  },
];

/// Get matching commands for an input, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
      continue;
    }

    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve an input to a single command. Prefixes must be unambiguous.
pub fn resolve(input: &str) -> Result<&'static Command> {
  let suggestions = get_suggestions(input);
  match suggestions.as_slice() {
    [] => Err(eyre!("Unknown command '{}'. Available:\n{}", input, command_help())),
    [only] => Ok(*only),
    // An exact name or alias wins over longer names it prefixes ("list" vs "list-all")
    [first, ..] if is_exact(first, input) => Ok(*first),
    many => Err(eyre!(
      "Ambiguous command '{}': {}",
      input,
      many.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
    )),
  }
}

fn is_exact(cmd: &Command, input: &str) -> bool {
  let input = input.to_lowercase();
  cmd.name == input || cmd.aliases.contains(&input.as_str())
}

/// One line per command: name, aliases and description.
pub fn command_help() -> String {
  COMMANDS
    .iter()
    .map(|c| format!("  {:<12} {:<16} {}", c.name, c.aliases.join(", "), c.description))
    .collect::<Vec<_>>()
    .join("\n")
}

/// A resolved command with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  List {
    page: u32,
    size: Option<u32>,
    example: Option<Value>,
  },
  All {
    example: Option<Value>,
  },
  Get(EntityId),
  Create(Value),
  Update(EntityId, Value),
  Delete(EntityId),
  Cached(EntityId),
  ClearCache,
}

/// Options shared by the list commands.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
  pub page: u32,
  pub size: Option<u32>,
  pub example: Option<String>,
}

impl Action {
  pub fn parse(command: &str, args: &[String], list: &ListOptions) -> Result<Self> {
    let cmd = resolve(command)?;
    let example = list.example.as_deref().map(parse_json).transpose()?;

    let action = match cmd.name {
      "list" => Action::List {
        page: list.page,
        size: list.size,
        example,
      },
      "all" => Action::All { example },
      "get" => Action::Get(id_arg(cmd, args)?),
      "create" => Action::Create(parse_json(arg(cmd, args, 0, "JSON")?)?),
      "update" => Action::Update(id_arg(cmd, args)?, parse_json(arg(cmd, args, 1, "JSON")?)?),
      "delete" => Action::Delete(id_arg(cmd, args)?),
      "cached" => Action::Cached(id_arg(cmd, args)?),
      _ => Action::ClearCache,
    };
    Ok(action)
  }

  /// Run against an entity module; the result is printed as JSON.
  pub async fn run(self, api: &EntityApi) -> Result<Value> {
    let output = match self {
      Action::List {
        page,
        size,
        example,
      } => json!(api.list_paged(page, size, example.as_ref()).await?),
      Action::All { example } => json!(api.list_all(example.as_ref()).await?),
      Action::Get(id) => json!(api.get(&id).await?),
      Action::Create(body) => json!(api.create(&body).await?),
      Action::Update(id, patch) => {
        api.update(&id, &patch).await?;
        json!({ "updated": id })
      }
      Action::Delete(id) => json!(api.delete(&id).await?),
      Action::Cached(id) => {
        let key = QueryKey::get(api.entity_type(), &id);
        let value = api
          .cache()
          .get_cached_value(&key)?
          .ok_or_else(|| eyre!("{} is not cached", key.description()))?;
        json!({
          "status": format!("{:?}", api.cache().status(&key)),
          "cached_at": api.cache().cached_at(&key)?,
          "value": value,
        })
      }
      Action::ClearCache => {
        api.cache().clear()?;
        json!({ "cleared": true })
      }
    };
    Ok(output)
  }
}

fn arg<'a>(cmd: &Command, args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
  args
    .get(index)
    .map(String::as_str)
    .ok_or_else(|| eyre!("'{}' expects {} as argument {}", cmd.name, what, index + 1))
}

fn id_arg(cmd: &Command, args: &[String]) -> Result<EntityId> {
  arg(cmd, args, 0, "an ID").map(EntityId::from)
}

fn parse_json(s: &str) -> Result<Value> {
  serde_json::from_str(s).map_err(|e| eyre!("Invalid JSON '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crudcache::{CacheStore, Client, HttpTransport};
  use std::time::Duration;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_empty_input_returns_all() {
    assert_eq!(get_suggestions("").len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_and_alias_match() {
    assert_eq!(resolve("get").unwrap().name, "get");
    assert_eq!(resolve("rm").unwrap().name, "delete");
    assert_eq!(resolve("LS").unwrap().name, "list");
  }

  #[test]
  fn test_unique_prefix_match() {
    assert_eq!(resolve("upd").unwrap().name, "update");
    assert_eq!(resolve("cle").unwrap().name, "clear-cache");
  }

  #[test]
  fn test_ambiguous_prefix_is_rejected() {
    assert!(resolve("c").is_err());
    assert!(resolve("nope").is_err());
  }

  #[test]
  fn test_parse_actions() {
    let list = ListOptions {
      page: 2,
      size: Some(5),
      example: Some(r#"{"status":"open"}"#.to_string()),
    };
    assert_eq!(
      Action::parse("list", &[], &list).unwrap(),
      Action::List {
        page: 2,
        size: Some(5),
        example: Some(json!({"status": "open"})),
      }
    );
    assert_eq!(
      Action::parse("update", &args(&["42", r#"{"status":"closed"}"#]), &ListOptions::default()).unwrap(),
      Action::Update(EntityId::from("42"), json!({"status": "closed"}))
    );
    assert_eq!(
      Action::parse("rm", &args(&["7"]), &ListOptions::default()).unwrap(),
      Action::Delete(EntityId::from("7"))
    );
  }

  #[test]
  fn test_parse_reports_missing_arguments() {
    assert!(Action::parse("get", &[], &ListOptions::default()).is_err());
    assert!(Action::parse("update", &args(&["42"]), &ListOptions::default()).is_err());
    assert!(Action::parse("create", &args(&["{oops"]), &ListOptions::default()).is_err());
  }

  #[tokio::test]
  async fn test_get_then_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/Invoice/42"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42", "status": "open"})))
      .expect(1)
      .mount(&server)
      .await;

    let transport = HttpTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let client = Client::new(transport, CacheStore::new());
    let api = client.entity("Invoice");

    let fetched = Action::Get(EntityId::from("42")).run(&api).await.unwrap();
    assert_eq!(fetched, json!({"id": "42", "status": "open"}));

    let cached = Action::Cached(EntityId::from("42")).run(&api).await.unwrap();
    assert_eq!(cached["value"], json!({"id": "42", "status": "open"}));
    assert_eq!(cached["status"], json!("Populated"));

    Action::ClearCache.run(&api).await.unwrap();
    assert!(Action::Cached(EntityId::from("42")).run(&api).await.is_err());
  }
}
