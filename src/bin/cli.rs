use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::Value;

use command_relay::error::RelayError;
use command_relay::paths;
use command_relay::protocol;
use command_relay::util::parse_command_args;

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "command-relay-cli", about = "List and run commands of connected apps", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay server URL (defaults to the port file of a running server)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Config directory holding the port file
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the commands of the first connected app
    #[command(visible_aliases = ["ls", "l"])]
    List,
    /// Run a command: `run <id> --name value --flag` or `run <id> '{"name": 1}'`
    #[command(visible_alias = "r")]
    Run {
        command_id: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the JSON Schema of the wire envelopes
    Schema,
}

// ── Server discovery ─────────────────────────────────────────────

fn base_url(cli: &Cli) -> Result<String, RelayError> {
    if let Some(url) = &cli.url {
        return Ok(url.trim_end_matches('/').to_string());
    }
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(paths::default_config_dir);
    read_port(&config_dir).map(|port| format!("http://127.0.0.1:{port}"))
}

fn read_port(config_dir: &Path) -> Result<u16, RelayError> {
    let path = paths::port_file_path(config_dir);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        RelayError::Http(format!(
            "no running server found ({}: {e}); start command-relay or pass --url",
            path.display()
        ))
    })?;
    raw.trim()
        .parse()
        .map_err(|e| RelayError::Http(format!("bad port file {}: {e}", path.display())))
}

// ── HTTP ─────────────────────────────────────────────────────────

fn fetch(response: reqwest::blocking::Response) -> Result<Value, RelayError> {
    let status = response.status();
    let body: Value = response.json()?;
    if status.is_success() {
        return Ok(body);
    }
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), str::to_string);
    Err(RelayError::Remote(format!("{status}: {message}")))
}

// ── Output formatting ────────────────────────────────────────────

/// One line per command, sorted by id, ids padded to the longest one.
fn format_commands(app: &Value) -> Vec<String> {
    let Some(commands) = app.get("commands").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut ids: Vec<&String> = commands.keys().collect();
    ids.sort();
    let width = ids.iter().map(|id| id.len()).max().unwrap_or(0);

    ids.into_iter()
        .map(|id| {
            let info = commands.get(id.as_str());
            let label = info
                .and_then(|i| i.get("label").or_else(|| i.get("caption")))
                .and_then(Value::as_str)
                .unwrap_or_default();
            format!("{id:<width$} {label}").trim_end().to_string()
        })
        .collect()
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// ── Commands ─────────────────────────────────────────────────────

fn run(cli: &Cli) -> Result<(), RelayError> {
    if let Commands::Schema = cli.command {
        print_json(&protocol::wire_schema());
        return Ok(());
    }

    let base = base_url(cli)?;
    let client = reqwest::blocking::Client::new();

    match &cli.command {
        Commands::List => {
            let body = fetch(client.get(format!("{base}/commands")).send()?)?;
            if cli.json {
                print_json(&body);
                return Ok(());
            }
            let Some(app) = body.get("apps").and_then(Value::as_array).and_then(|a| a.first()) else {
                return Err(RelayError::NoApps);
            };
            if let Some(error) = app.get("error").and_then(Value::as_str) {
                return Err(RelayError::Remote(error.to_string()));
            }
            for line in format_commands(app) {
                println!("{line}");
            }
        }
        Commands::Run { command_id, args } => {
            let args = parse_command_args(args)?;
            let body = fetch(
                client
                    .post(format!("{base}/commands/{command_id}"))
                    .json(&args)
                    .send()?,
            )?;
            if cli.json {
                print_json(&body);
            } else {
                print_json(body.get("response").unwrap_or(&Value::Null));
            }
        }
        Commands::Schema => {}
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn commands_are_sorted_and_padded() {
        let app = json!({
            "commands": {
                "zz:last": {"caption": "Only a caption"},
                "a:first": {"label": "First"},
                "mid": {}
            }
        });
        assert_eq!(
            format_commands(&app),
            ["a:first First", "mid", "zz:last Only a caption"]
        );
    }

    #[test]
    fn run_accepts_flag_style_args() {
        let cli = Cli::try_parse_from(["command-relay-cli", "r", "demo:greet", "--name", "relay"]).unwrap();
        match cli.command {
            Commands::Run { command_id, args } => {
                assert_eq!(command_id, "demo:greet");
                assert_eq!(args, ["--name", "relay"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn port_file_is_read_from_config_dir() {
        let dir = std::env::temp_dir().join(format!("command_relay_cli_{}", process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(paths::port_file_path(&dir), "4321\n").unwrap();
        assert_eq!(read_port(&dir).unwrap(), 4321);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
