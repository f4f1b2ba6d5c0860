use crate::store::DEFAULT_CAPACITY;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Upper bound for `capacity`; indices must fit in a byte.
pub const MAX_CAPACITY: usize = 255;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub bind: SocketAddr,
    pub capacity: usize,
    pub namespace: String, // key/value directory under the home dir
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            capacity: DEFAULT_CAPACITY,
            namespace: "totp".to_string(),
        }
    }
}

impl Config {
    /// Read `config.json` from `root` (defaults if absent), then apply
    /// `OTPKEEP_*` environment overrides.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let path = config_path(root);
        let mut cfg = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            log::info!("{} not found, using default settings", path.display());
            Config::default()
        };
        cfg.apply_overrides(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var("OTPKEEP_BIND") {
            match bind.parse() {
                Ok(addr) => self.bind = addr,
                Err(e) => log::warn!("ignoring OTPKEEP_BIND={bind:?}: {e}"),
            }
        }
        if let Some(capacity) = var("OTPKEEP_CAPACITY") {
            match capacity.parse() {
                Ok(n) => self.capacity = n,
                Err(e) => log::warn!("ignoring OTPKEEP_CAPACITY={capacity:?}: {e}"),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            bail!("capacity must be between 1 and {MAX_CAPACITY}, got {}", self.capacity);
        }
        let ns = Path::new(&self.namespace);
        if self.namespace.is_empty() || ns.components().count() != 1 || ns.is_absolute() {
            bail!("namespace must be a plain directory name, got {:?}", self.namespace);
        }
        Ok(())
    }
}

/// Home directory: explicit flag, then `OTPKEEP_HOME`, then the platform
/// data dir (e.g. ~/.local/share/otpkeep).
pub fn store_root(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(dir) = std::env::var("OTPKEEP_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let mut dir = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("cannot get data dir"))?;
    dir.push("otpkeep");
    Ok(dir)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join("config.json")
}

pub fn save_config(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(cfg)?;
    std::fs::write(path, s)?;
    Ok(())
}
