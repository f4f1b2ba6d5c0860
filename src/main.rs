mod base32;
mod clock;
mod config;
mod engine;
mod parser;
mod prompt;
mod server;
mod service;
mod storage;
mod store;

use crate::clock::{SystemClock, looks_synchronized};
use crate::config::{Config, config_path, save_config, store_root};
use crate::prompt::{confirm, prompt_string};
use crate::server::{AppState, CodeResponse};
use crate::storage::FileKv;
use crate::store::CredentialStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "otpkeep", version, about = "TOTP authenticator with a small HTTP API")]
struct Cli {
    /// Store directory (defaults to $OTPKEEP_HOME, then the platform data dir)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the store directory and a default config.json
    Init,

    /// Add a service from an otpauth://totp/ URI
    ///
    /// Examples:
    ///   otpkeep add 'otpauth://totp/GitHub:me@example.com?secret=JBSWY3DPEHPK3PXP&issuer=GitHub'
    ///   otpkeep add            (prompts for the URI)
    Add {
        /// Quote it in the shell; it contains '&'
        uri: Option<String>,
    },

    /// List stored services
    Ls {
        /// Print the same JSON the HTTP API returns
        #[arg(long)]
        json: bool,
    },

    /// Show the current code for a service
    Code {
        index: usize,
        /// Print the same JSON the HTTP API returns
        #[arg(long)]
        json: bool,
    },

    /// Remove a service; later indices shift down by one
    Rm { index: usize },

    /// Remove every service
    Clear {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Run the HTTP API
    Serve {
        /// Overrides `bind` from config.json
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let root = store_root(cli.home.as_deref())?;

    match cli.command {
        Commands::Init => cmd_init(&root)?,
        Commands::Add { uri } => cmd_add(&root, uri)?,
        Commands::Ls { json } => cmd_ls(&root, json)?,
        Commands::Code { index, json } => cmd_code(&root, index, json)?,
        Commands::Rm { index } => cmd_rm(&root, index)?,
        Commands::Clear { yes } => cmd_clear(&root, yes)?,
        Commands::Serve { bind } => cmd_serve(&root, bind)?,
    }

    Ok(())
}

fn open_store(root: &Path) -> anyhow::Result<(Config, CredentialStore)> {
    let config = Config::load(root)?;
    let kv = FileKv::open(root.join(&config.namespace))?;
    log::debug!("opening store in {}", kv.dir().display());
    let store = CredentialStore::open(Box::new(kv), config.capacity)
        .with_context(|| format!("cannot open store under {}", root.display()))?;
    Ok((config, store))
}

fn cmd_init(root: &Path) -> anyhow::Result<()> {
    let path = config_path(root);
    if path.exists() {
        println!("Store already exists at: {}", root.display());
        return Ok(());
    }

    std::fs::create_dir_all(root)?;
    let config = Config::default();
    save_config(&config, &path)?;
    FileKv::open(root.join(&config.namespace))?;

    println!("Initialized store at {}", root.display());
    Ok(())
}

fn cmd_add(root: &Path, uri: Option<String>) -> anyhow::Result<()> {
    let (_, mut store) = open_store(root)?;

    let uri = match uri {
        Some(uri) => uri,
        None => prompt_string("otpauth:// URI: ")?,
    };
    let uri = uri.trim();
    if uri.is_empty() {
        anyhow::bail!("URI cannot be empty");
    }

    let service = parser::parse_uri(uri)?;
    let label = format!("{} ({})", service.issuer(), service.account());
    let index = store.add(service)?;
    println!("Added {label} at index {index}");
    Ok(())
}

fn cmd_ls(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, store) = open_store(root)?;

    if json {
        println!("{}", store.list_as_json()?);
        return Ok(());
    }

    for (i, s) in store.iter().enumerate() {
        println!(
            "{i:>3}  {:<20} {:<32} {} digits / {}s",
            s.issuer(),
            s.account(),
            s.digits(),
            s.period()
        );
    }
    if store.count() == store.capacity() {
        println!("(store is full: {} services)", store.capacity());
    }
    Ok(())
}

fn cmd_code(root: &Path, index: usize, json: bool) -> anyhow::Result<()> {
    let (_, store) = open_store(root)?;
    let service = store.get(index)?;

    let clock = SystemClock;
    if !looks_synchronized(&clock) {
        log::warn!("system clock looks unset; codes will not match the server");
    }
    let code = engine::generate_code(
        service.secret().as_str(),
        service.period(),
        service.digits(),
        &clock,
    )?;
    let remaining = engine::remaining_seconds(service.period(), &clock)?;

    if json {
        let response = CodeResponse {
            code,
            remaining,
            service: service.issuer().to_string(),
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!(
            "{}  ({remaining}s left)",
            engine::format_code(code, service.digits())
        );
    }
    Ok(())
}

fn cmd_rm(root: &Path, index: usize) -> anyhow::Result<()> {
    let (_, mut store) = open_store(root)?;
    let removed = store.delete(index)?;
    println!("Removed {} ({})", removed.issuer(), removed.account());
    Ok(())
}

fn cmd_clear(root: &Path, yes: bool) -> anyhow::Result<()> {
    let (_, mut store) = open_store(root)?;
    if store.count() == 0 {
        return Ok(());
    }
    if !yes && !confirm(&format!("Remove all {} services?", store.count()))? {
        println!("Aborted.");
        return Ok(());
    }
    store.clear()?;
    println!("Store cleared.");
    Ok(())
}

fn cmd_serve(root: &Path, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let (config, store) = open_store(root)?;
    log::info!(
        "loaded {} of {} services from {}",
        store.count(),
        store.capacity(),
        root.join(&config.namespace).display()
    );

    let clock = Arc::new(SystemClock);
    if !looks_synchronized(clock.as_ref()) {
        log::warn!("system clock looks unset; generated codes will be wrong until it is synchronized");
    }

    let state = AppState::new(store, clock);
    let addr = bind.unwrap_or(config.bind);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::serve(state, addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn json_flags_share_help_text() {
        let cmd = Cli::command();
        for name in ["ls", "code"] {
            let sub = cmd.find_subcommand(name).unwrap();
            let json = sub.get_arguments().find(|a| a.get_id() == "json").unwrap();
            assert_eq!(
                json.get_help().unwrap().to_string(),
                "Print the same JSON the HTTP API returns",
                "{name}"
            );
        }
    }

    #[test]
    fn code_takes_index_and_json() {
        let cli = Cli::try_parse_from(["otpkeep", "code", "3", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Code {
                index: 3,
                json: true
            }
        ));
    }
}
