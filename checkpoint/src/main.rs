//! Command-line access to stored checkpoints.
//!
//! Derives identities the same way the library does and reads or deletes the
//! blobs stored under them, using the backend from `checkpoint.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use checkpoint::core::identity::IdentityArgs;
use checkpoint::exit_codes;
use checkpoint::io::config::{Backend, load_config, open_store};
use checkpoint::io::store::{Store, StoreError};
use checkpoint::logging;
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "checkpoint",
    version,
    about = "Inspect and manage checkpoints of resumable computations"
)]
struct Cli {
    /// Configuration file selecting the store backend.
    #[arg(long, global = true, default_value = "checkpoint.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the identity derived from a type tag and construction arguments.
    Identity {
        type_tag: String,
        /// Positional arguments, in order.
        args: Vec<String>,
        /// Named argument as KEY=VALUE (repeatable, order matters).
        #[arg(long = "named", value_parser = parse_named)]
        named: Vec<(String, String)>,
        /// Also print the signature the identity was hashed from.
        #[arg(long)]
        signature: bool,
    },
    /// Print the blob stored under a key.
    Show { key: String },
    /// Delete the blob stored under a key (no-op if absent).
    Delete { key: String },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Identity {
            type_tag,
            args,
            named,
            signature,
        } => cmd_identity(type_tag, args, named, signature),
        Command::Show { key } => cmd_show(&cli.config, &key),
        Command::Delete { key } => cmd_delete(&cli.config, &key),
    }
}

fn cmd_identity(
    type_tag: String,
    args: Vec<String>,
    named: Vec<(String, String)>,
    signature: bool,
) -> Result<i32> {
    let identity_args = named.into_iter().fold(
        args.into_iter()
            .fold(IdentityArgs::new(type_tag), |acc, arg| acc.arg(arg)),
        |acc, (key, value)| acc.named(key, value),
    );
    if signature {
        println!("{}", identity_args.signature());
    }
    println!("{}", identity_args.identity());
    Ok(exit_codes::OK)
}

fn cmd_show(config_path: &Path, key: &str) -> Result<i32> {
    let store = open_cli_store(config_path)?;
    match store.get(key) {
        Ok(blob) => {
            match serde_json::from_slice::<Value>(&blob) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", String::from_utf8_lossy(&blob)),
            }
            Ok(exit_codes::OK)
        }
        Err(err @ StoreError::NotFound { .. }) => {
            eprintln!("{err}");
            Ok(exit_codes::NOT_FOUND)
        }
    }
}

fn cmd_delete(config_path: &Path, key: &str) -> Result<i32> {
    let store = open_cli_store(config_path)?;
    store.delete(key)?;
    Ok(exit_codes::OK)
}

/// Open the configured store; a memory store would start empty on every run.
fn open_cli_store(config_path: &Path) -> Result<Arc<dyn Store>> {
    let cfg = load_config(config_path)?;
    if cfg.store.backend == Backend::Memory {
        return Err(anyhow!(
            "{}: store.backend = \"memory\" does not persist between commands; use \"file\" or \"remote\"",
            config_path.display()
        ));
    }
    open_store(&cfg)
}

fn parse_named(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{raw}'"))?;
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_identity_with_named_arguments() {
        let cli = Cli::parse_from([
            "checkpoint",
            "identity",
            "SomeClass",
            "1",
            "2",
            "--named",
            "key1=value1",
            "--named",
            "key2=value2",
        ]);
        let Command::Identity { args, named, .. } = cli.command else {
            panic!("expected identity command");
        };
        assert_eq!(args, ["1", "2"]);
        assert_eq!(
            named,
            [
                ("key1".to_string(), "value1".to_string()),
                ("key2".to_string(), "value2".to_string())
            ]
        );
    }

    #[test]
    fn parse_show_with_config() {
        let cli = Cli::parse_from(["checkpoint", "show", "abc", "--config", "other.toml"]);
        assert!(matches!(cli.command, Command::Show { ref key } if key == "abc"));
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }

    #[test]
    fn parse_named_requires_equals() {
        assert!(parse_named("novalue").is_err());
        assert_eq!(
            parse_named("a=b=c").expect("parse"),
            ("a".to_string(), "b=c".to_string())
        );
    }
}
