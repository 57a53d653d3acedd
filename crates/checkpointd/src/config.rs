use anyhow::{Context, Result};
use checkpoint_core::{Location, LocationList, PolicyTable, PolicyTier};
use std::path::PathBuf;

/// Which D-Bus bus to claim the service name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Wall-clock budget for a single verification.
    pub verify_timeout_secs: u64,
    /// Tier used when a caller passes an empty tier string.
    pub default_tier: PolicyTier,
    /// TOML allow-list of permitted locations. Unset disables geofencing.
    pub locations_file: Option<PathBuf>,
    /// Optional TOML override of the built-in policy table.
    pub policy_file: Option<PathBuf>,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `CHECKPOINT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let default_tier = std::env::var("CHECKPOINT_POLICY_TIER")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(tier) => Some(tier),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring CHECKPOINT_POLICY_TIER");
                    None
                }
            })
            .unwrap_or_default();

        let bus = match std::env::var("CHECKPOINT_BUS").as_deref() {
            Ok("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            verify_timeout_secs: env_u64("CHECKPOINT_VERIFY_TIMEOUT_SECS", 5),
            default_tier,
            locations_file: env_path("CHECKPOINT_LOCATIONS_FILE"),
            policy_file: env_path("CHECKPOINT_POLICY_FILE"),
            bus,
        }
    }

    pub fn load_policy(&self) -> Result<PolicyTable> {
        let Some(path) = &self.policy_file else {
            return Ok(PolicyTable::default());
        };
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("reading policy table {}", path.display()))?;
        PolicyTable::from_toml_str(&src).with_context(|| format!("loading {}", path.display()))
    }

    pub fn load_locations(&self) -> Result<Vec<Location>> {
        let Some(path) = &self.locations_file else {
            return Ok(Vec::new());
        };
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("reading locations {}", path.display()))?;
        let list = LocationList::from_toml_str(&src)
            .with_context(|| format!("loading {}", path.display()))?;
        Ok(list.locations)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
