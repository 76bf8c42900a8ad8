use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RelayError;

/// Get the serde-serialized name of a unit enum variant.
/// Uses serde's own rules (rename_all, rename, etc.) as the single source of truth.
/// Returns `None` for non-string variants (data-carrying variants).
pub fn serde_variant_name<T: Serialize>(val: &T) -> Option<String> {
    match serde_json::to_value(val) {
        Ok(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Parse shell-style tokens into a JSON argument object.
///
/// A single `{...}` token is taken as the whole object. Otherwise tokens are
/// `--name=value`, `--name value` or a bare `--flag` (which is `true`).
/// Values are JSON when they parse as JSON and strings otherwise. A name of
/// the form `--/a/b/c` writes into nested objects.
pub fn parse_command_args<S: AsRef<str>>(argv: &[S]) -> Result<Map<String, Value>, RelayError> {
    if let [only] = argv {
        let only = only.as_ref();
        if only.starts_with('{') && only.ends_with('}') {
            return match serde_json::from_str(only)? {
                Value::Object(args) => Ok(args),
                other => Err(RelayError::InvalidArgs(format!(
                    "Expected a JSON object, got {other}"
                ))),
            };
        }
    }

    let mut args = Map::new();
    let mut tokens = argv.iter().map(AsRef::as_ref).peekable();

    while let Some(token) = tokens.next() {
        let Some(flag) = token.strip_prefix("--") else {
            return Err(RelayError::InvalidArgs(format!(
                "Expected param: maybe --{token} instead of {token}"
            )));
        };

        let (name, value) = match flag.split_once('=') {
            Some((name, raw)) => (name, parse_value(raw)),
            None => match tokens.next_if(|next| !next.starts_with("--")) {
                Some(raw) => (flag, parse_value(raw)),
                None => (flag, Value::Bool(true)),
            },
        };

        insert_arg(&mut args, name, value)?;
    }

    Ok(args)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn insert_arg(args: &mut Map<String, Value>, name: &str, value: Value) -> Result<(), RelayError> {
    let Some(path) = name.strip_prefix('/') else {
        args.insert(name.to_string(), value);
        return Ok(());
    };

    let cant_update =
        || RelayError::InvalidArgs(format!("Can't update /{path} from --{name}"));
    let mut bits = path.split('/').collect::<Vec<_>>();
    let last = bits.pop().unwrap_or_default();

    let mut nest = args;
    for bit in bits {
        nest = nest
            .entry(bit)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(cant_update)?;
    }
    nest.insert(last.to_string(), value);
    Ok(())
}
