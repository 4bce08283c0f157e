//! # Pool Configuration
//!
//! `PoolOptions` is the raw surface a caller fills in (from a CLI, a file or the
//! environment). `PoolConfig` is the resolved, validated form the pool runs with
//! and never changes once a pool is built.

use crate::constants::{env, DEFAULT_DEBUG_BASE_PORT};
use crate::error::{PoolError, Result};
use crate::execution::debug_port::{port_for, DebugMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A debug option as supplied by a caller: a bare switch or an explicit base port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DebugPort {
    Enabled(bool),
    Port(u16),
}

impl DebugPort {
    /// `false` and port `0` both leave debugging off.
    fn is_active(self) -> bool {
        !matches!(self, DebugPort::Enabled(false) | DebugPort::Port(0))
    }

    fn base_port(self) -> u16 {
        match self {
            DebugPort::Port(port) => port,
            DebugPort::Enabled(_) => DEFAULT_DEBUG_BASE_PORT,
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Ok(enabled) = raw.parse::<bool>() {
            return Ok(DebugPort::Enabled(enabled));
        }
        raw.parse::<u16>()
            .map(DebugPort::Port)
            .map_err(|e| PoolError::ConfigurationError(format!("Invalid debug port '{raw}': {e}")))
    }
}

/// Raw pool options before resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub worker_count: usize,
    #[serde(default)]
    pub debug: Option<DebugPort>,
    #[serde(default)]
    pub debug_brk: Option<DebugPort>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    #[serde(default)]
    pub worker_args: Vec<String>,
}

impl PoolOptions {
    /// Load options from an optional config file layered under `POOL_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// Like [`PoolOptions::load`], but reads variables from `env_source` instead of
    /// the process environment when one is given.
    pub fn load_from(
        path: Option<&Path>,
        env_source: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading pool options from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(env::PREFIX)
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("worker_args")
                .source(env_source),
        );

        let options: PoolOptions = builder.build()?.try_deserialize()?;
        Ok(options)
    }
}

/// Resolved configuration for one pool. Immutable for the pool's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub debug_mode: DebugMode,
    pub debug_base_port: u16,
    pub dry_run: bool,
    /// Worker entry point; the current executable when unset.
    pub worker_program: Option<PathBuf>,
    /// Startup arguments every worker inherits, ahead of its debug flag.
    pub worker_args: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            debug_mode: DebugMode::None,
            debug_base_port: DEFAULT_DEBUG_BASE_PORT,
            dry_run: false,
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

impl PoolConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    pub fn with_debug(mut self, mode: DebugMode, base_port: u16) -> Self {
        self.debug_mode = mode;
        self.debug_base_port = base_port;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_worker_program(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.worker_program = Some(program.into());
        self.worker_args = args;
        self
    }

    /// Resolve raw options. `debug_brk` wins over `debug` when both are active.
    pub fn from_options(options: PoolOptions) -> Result<Self> {
        let debug = options.debug.filter(|d| d.is_active());
        let debug_brk = options.debug_brk.filter(|d| d.is_active());

        let (debug_mode, debug_base_port) = match (debug, debug_brk) {
            (Some(_), Some(brk)) => {
                warn!("Both debug and debug_brk were given; breaking on first line");
                (DebugMode::DebugBreak, brk.base_port())
            }
            (None, Some(brk)) => (DebugMode::DebugBreak, brk.base_port()),
            (Some(dbg), None) => (DebugMode::Debug, dbg.base_port()),
            (None, None) => (DebugMode::None, DEFAULT_DEBUG_BASE_PORT),
        };

        let config = Self {
            worker_count: options.worker_count,
            debug_mode,
            debug_base_port,
            dry_run: options.dry_run,
            worker_program: options.worker_program,
            worker_args: options.worker_args,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from `POOL_*` variables resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let count = lookup(env::WORKER_COUNT).ok_or_else(|| {
            PoolError::ConfigurationError(format!("{} is required", env::WORKER_COUNT))
        })?;
        let mut options = PoolOptions {
            worker_count: count.trim().parse().map_err(|e| {
                PoolError::ConfigurationError(format!("Invalid worker_count: {e}"))
            })?,
            ..PoolOptions::default()
        };

        if let Some(debug) = lookup(env::DEBUG) {
            options.debug = Some(DebugPort::parse(&debug)?);
        }

        if let Some(debug_brk) = lookup(env::DEBUG_BRK) {
            options.debug_brk = Some(DebugPort::parse(&debug_brk)?);
        }

        if let Some(dry_run) = lookup(env::DRY_RUN) {
            options.dry_run = dry_run.trim().parse().map_err(|e| {
                PoolError::ConfigurationError(format!("Invalid dry_run: {e}"))
            })?;
        }

        if let Some(program) = lookup(env::WORKER_PROGRAM) {
            options.worker_program = Some(PathBuf::from(program));
        }

        Self::from_options(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(PoolError::ConfigurationError(
                "worker_count must be greater than zero".to_string(),
            ));
        }

        if self.debug_mode.is_enabled()
            && port_for(self.worker_count - 1, self.debug_base_port).is_none()
        {
            return Err(PoolError::ConfigurationError(format!(
                "debug ports from {} for {} workers exceed {}",
                self.debug_base_port,
                self.worker_count,
                u16::MAX
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_debug_without_port_uses_default_base() {
        let config = PoolConfig::from_options(PoolOptions {
            worker_count: 2,
            debug: Some(DebugPort::Enabled(true)),
            ..PoolOptions::default()
        })
        .unwrap();

        assert_eq!(config.debug_mode, DebugMode::Debug);
        assert_eq!(config.debug_base_port, 5858);
    }

    #[test]
    fn test_debug_brk_takes_precedence() {
        let config = PoolConfig::from_options(PoolOptions {
            worker_count: 2,
            debug: Some(DebugPort::Port(7000)),
            debug_brk: Some(DebugPort::Port(9229)),
            ..PoolOptions::default()
        })
        .unwrap();

        assert_eq!(config.debug_mode, DebugMode::DebugBreak);
        assert_eq!(config.debug_base_port, 9229);
    }

    #[test]
    fn test_disabled_debug_switch_is_ignored() {
        let config = PoolConfig::from_options(PoolOptions {
            worker_count: 1,
            debug: Some(DebugPort::Enabled(false)),
            ..PoolOptions::default()
        })
        .unwrap();

        assert_eq!(config.debug_mode, DebugMode::None);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = PoolConfig::from_options(PoolOptions::default());
        assert!(matches!(result, Err(PoolError::ConfigurationError(_))));
    }

    #[test]
    fn test_port_overflow_rejected() {
        let config = PoolConfig::new(3).with_debug(DebugMode::Debug, u16::MAX - 1);
        assert!(config.validate().is_err());

        let config = PoolConfig::new(2).with_debug(DebugMode::Debug, u16::MAX - 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_worker_count_with_debug_rejected() {
        let config = PoolConfig::new(usize::MAX).with_debug(DebugMode::Debug, 5858);
        assert!(matches!(
            config.validate(),
            Err(PoolError::ConfigurationError(_))
        ));

        let config = PoolConfig::new((u32::MAX as usize).saturating_add(1))
            .with_debug(DebugMode::DebugBreak, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_zero_leaves_debug_off() {
        let config = PoolConfig::from_options(PoolOptions {
            worker_count: 2,
            debug: Some(DebugPort::Port(0)),
            debug_brk: Some(DebugPort::Port(0)),
            ..PoolOptions::default()
        })
        .unwrap();
        assert_eq!(config.debug_mode, DebugMode::None);

        let config = PoolConfig::from_lookup(lookup_from(&[
            ("POOL_WORKER_COUNT", "2"),
            ("POOL_DEBUG", "0"),
        ]))
        .unwrap();
        assert_eq!(config.debug_mode, DebugMode::None);
    }

    #[test]
    fn test_from_lookup() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            ("POOL_WORKER_COUNT", "4"),
            ("POOL_DEBUG", "true"),
            ("POOL_DRY_RUN", "true"),
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 4);
        assert_eq!(config.debug_mode, DebugMode::Debug);
        assert_eq!(config.debug_base_port, 5858);
        assert!(config.dry_run);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = PoolConfig::from_lookup(lookup_from(&[("POOL_WORKER_COUNT", "many")]));
        assert!(result.is_err());

        let result = PoolConfig::from_lookup(lookup_from(&[
            ("POOL_WORKER_COUNT", "2"),
            ("POOL_DEBUG_BRK", "port"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup_requires_worker_count() {
        let result = PoolConfig::from_lookup(|_| None);
        assert!(matches!(result, Err(PoolError::ConfigurationError(_))));

        let result = PoolConfig::from_lookup(lookup_from(&[("POOL_DRY_RUN", "true")]));
        match result {
            Err(PoolError::ConfigurationError(message)) => {
                assert!(message.contains("POOL_WORKER_COUNT"))
            }
            other => panic!("Expected ConfigurationError, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_env_source() {
        let mut vars = HashMap::new();
        vars.insert("POOL_WORKER_COUNT".to_string(), "3".to_string());
        vars.insert("POOL_DEBUG_BRK".to_string(), "6000".to_string());
        vars.insert("POOL_WORKER_ARGS".to_string(), "--require steps".to_string());

        let options = PoolOptions::load_from(None, Some(vars)).unwrap();
        assert_eq!(options.worker_count, 3);
        assert_eq!(options.debug_brk, Some(DebugPort::Port(6000)));
        assert_eq!(options.worker_args, vec!["--require", "steps"]);
    }
}
