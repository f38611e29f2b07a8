//! Registry configuration
//!
//! Read from the environment by the process-wide registry:
//!
//! | variable                       | field             | format                          |
//! |--------------------------------|-------------------|---------------------------------|
//! | `SCOPE_TRACE_ENABLE`           | `enabled`         | `1/0/true/false/yes/no/on/off`  |
//! | `SCOPE_TRACE_BATCH_PERIOD_NS`  | `batch_period_ns` | unsigned integer                |
//! | `SCOPE_TRACE_RENDEZVOUS_DIR`   | `rendezvous_dir`  | directory path                  |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::batch::BatchPolicy;
use crate::error::ScopeTraceError;

/// Environment variable toggling recording
pub const ENV_ENABLE: &str = "SCOPE_TRACE_ENABLE";
/// Environment variable holding the batch period in nanoseconds
pub const ENV_BATCH_PERIOD_NS: &str = "SCOPE_TRACE_BATCH_PERIOD_NS";
/// Environment variable overriding the rendezvous directory
pub const ENV_RENDEZVOUS_DIR: &str = "SCOPE_TRACE_RENDEZVOUS_DIR";

/// Registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Record scopes
    pub enabled: bool,
    /// Batch period in nanoseconds of thread CPU time (0 and 1 are sentinels)
    pub batch_period_ns: u64,
    /// Directory holding rendezvous records; the OS temp dir when unset
    pub rendezvous_dir: Option<PathBuf>,
}

impl TraceConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ScopeTraceError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable
    /// name to its value
    pub fn from_vars<F>(lookup: F) -> Result<Self, ScopeTraceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_ENABLE) {
            config.enabled = parse_flag(&raw).ok_or_else(|| {
                ScopeTraceError::invalid_config(format!("{ENV_ENABLE}={raw}"))
            })?;
        }

        if let Some(raw) = lookup(ENV_BATCH_PERIOD_NS) {
            config.batch_period_ns = raw.trim().parse().map_err(|e| {
                ScopeTraceError::invalid_config(format!("{ENV_BATCH_PERIOD_NS}={raw}: {e}"))
            })?;
        }

        if let Some(raw) = lookup(ENV_RENDEZVOUS_DIR) {
            let raw = raw.trim();
            if !raw.is_empty() {
                config.rendezvous_dir = Some(PathBuf::from(raw));
            }
        }

        Ok(config)
    }

    /// Batch period as a policy
    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy::from_period_ns(self.batch_period_ns)
    }

    /// Directory for rendezvous records, resolving the default
    pub fn rendezvous_dir_or_temp(&self) -> PathBuf {
        self.rendezvous_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
