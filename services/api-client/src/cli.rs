//! Command-line parsing

use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "api-client")]
#[command(about = "Send authenticated requests and manage the stored session")]
pub struct Cli {
    /// Path to the TOML config file (default: $CONFIG_PATH or ./api-client.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Fetch a resource
    Get { url: String },
    /// Delete a resource
    Delete { url: String },
    /// Create a resource from a JSON body
    Post {
        url: String,
        #[arg(value_parser = parse_json)]
        body: Value,
    },
    /// Replace a resource with a JSON body
    Put {
        url: String,
        #[arg(value_parser = parse_json)]
        body: Value,
    },
    /// Update part of a resource with a JSON body
    Patch {
        url: String,
        #[arg(value_parser = parse_json)]
        body: Value,
    },
    /// Store a credential pair
    Login { access: String, refresh: String },
    /// Clear the stored session
    Logout,
    /// Show whether a session is stored
    Status,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("not valid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("api-client").chain(args.iter().copied()))
    }

    #[test]
    fn parses_get_with_flags() {
        let cli = parse(&["--config", "/etc/api.toml", "--metrics", "get", "/feed"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/api.toml"));
        assert!(cli.metrics);
        assert_eq!(cli.command, Command::Get { url: "/feed".into() });
    }

    #[test]
    fn flags_may_follow_the_command() {
        let cli = parse(&["delete", "/matches/3", "--metrics", "--config", "alt.toml"]).unwrap();
        assert!(cli.metrics);
        assert_eq!(cli.config.as_deref(), Some("alt.toml"));
        assert_eq!(cli.command, Command::Delete { url: "/matches/3".into() });
    }

    #[test]
    fn parses_json_body_for_mutations() {
        let cli = parse(&["patch", "/profile", r#"{"bio":"hi"}"#]).unwrap();
        assert_eq!(
            cli.command,
            Command::Patch {
                url: "/profile".into(),
                body: json!({"bio": "hi"})
            }
        );
    }

    #[test]
    fn rejects_invalid_json_body() {
        let err = parse(&["post", "/matches", "{nope"]).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn parses_session_commands() {
        assert_eq!(
            parse(&["login", "at", "rt"]).unwrap().command,
            Command::Login {
                access: "at".into(),
                refresh: "rt".into()
            }
        );
        assert_eq!(parse(&["logout"]).unwrap().command, Command::Logout);
        assert_eq!(parse(&["status"]).unwrap().command, Command::Status);
    }

    #[test]
    fn rejects_missing_or_unknown_commands() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["get"]).is_err());
        assert!(parse(&["fetch", "/feed"]).is_err());
        assert!(parse(&["status", "--config"]).is_err());
    }
}
