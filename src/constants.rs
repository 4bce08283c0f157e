//! Shared constants for the pool and its workers.

/// Inspector port used by slot 0 when a debug mode is chosen without a port.
pub const DEFAULT_DEBUG_BASE_PORT: u16 = 5858;

/// Flag names appended to a worker's argument list in debug mode.
pub const DEBUG_FLAG: &str = "--debug";
pub const DEBUG_BRK_FLAG: &str = "--debug-brk";

/// Environment variables read by `PoolConfig::from_env` and `PoolOptions::load`.
pub mod env {
    pub const PREFIX: &str = "POOL";
    pub const WORKER_COUNT: &str = "POOL_WORKER_COUNT";
    pub const DEBUG: &str = "POOL_DEBUG";
    pub const DEBUG_BRK: &str = "POOL_DEBUG_BRK";
    pub const DRY_RUN: &str = "POOL_DRY_RUN";
    pub const WORKER_PROGRAM: &str = "POOL_WORKER_PROGRAM";
    pub const LOG_DIR: &str = "POOL_LOG_DIR";
    pub const ENVIRONMENT: &str = "POOL_ENV";
}
