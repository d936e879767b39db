use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable that toggles strict resolution.
pub const STRICT_RESOLUTION_ENV: &str = "PULSE_STRICT_RESOLUTION";
/// Environment variable that overrides `control.control_level`.
pub const CONTROL_LEVEL_ENV: &str = "PULSE_CONTROL_LEVEL";

// ── Control level ─────────────────────────────────────────────────────────────

/// How much authority the assistant has over the fleet.
///
/// | Level        | Behaviour                                                  |
/// |--------------|------------------------------------------------------------|
/// | `read_only`  | Write-class tools are hidden and every write is refused.   |
/// | `controlled` | Writes run only after a human approves the exact command.  |
/// | `autonomous` | Writes run immediately; policy blocks still apply.         |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlLevel {
    ReadOnly,
    #[default]
    Controlled,
    Autonomous,
}

impl ControlLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlLevel::ReadOnly => "read_only",
            ControlLevel::Controlled => "controlled",
            ControlLevel::Autonomous => "autonomous",
        }
    }

    pub fn allows_writes(&self) -> bool {
        !matches!(self, ControlLevel::ReadOnly)
    }
}

impl FromStr for ControlLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read_only" | "readonly" => Ok(ControlLevel::ReadOnly),
            "controlled" => Ok(ControlLevel::Controlled),
            "autonomous" => Ok(ControlLevel::Autonomous),
            other => bail!("unknown control level '{other}' (expected read_only, controlled or autonomous)"),
        }
    }
}

impl std::fmt::Display for ControlLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict resolution is on only for the exact values `true`, `1` and `yes`.
/// Matching is case-sensitive: `TRUE` or `Yes` leave it off.
pub fn is_strict_resolution_value(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes")
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub control_level: ControlLevel,
    /// Guests that may never be started, stopped or deleted.  Entries match
    /// either the VMID (as a string) or the guest name.
    pub protected_guests: Vec<String>,
    /// Refuse writes against resources this session never discovered.
    /// Overridden by `PULSE_STRICT_RESOLUTION`.
    pub strict_resolution: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Seconds a pending approval stays valid.
    pub timeout_secs: u64,
    /// Upper bound on simultaneously pending approvals.
    pub max_pending: usize,
    /// Decided approvals older than this are dropped by cleanup.
    pub retention_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_pending: 100,
            retention_secs: 24 * 60 * 60,
        }
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// How long an explicit single-resource lookup counts as "recently
    /// referenced" when deciding whether a host-level write was meant for a
    /// child guest.
    pub recent_access_window_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            recent_access_window_secs: 30,
        }
    }
}

impl RoutingConfig {
    pub fn recent_access_window(&self) -> Duration {
        Duration::from_secs(self.recent_access_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PulseConfig {
    pub control: ControlConfig,
    pub approval: ApprovalConfig,
    pub routing: RoutingConfig,
    pub telemetry: TelemetryConfig,
}

impl PulseConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Apply `PULSE_*` overrides using `lookup` to fetch variable values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(STRICT_RESOLUTION_ENV) {
            self.control.strict_resolution = is_strict_resolution_value(&value);
        }

        if let Some(value) = lookup(CONTROL_LEVEL_ENV) {
            if !value.is_empty() {
                match value.parse::<ControlLevel>() {
                    Ok(level) => self.control.control_level = level,
                    Err(err) => warn!(%err, "ignoring {CONTROL_LEVEL_ENV}"),
                }
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn is_protected(&self, vmid: u32, name: &str) -> bool {
        let id = vmid.to_string();
        self.control
            .protected_guests
            .iter()
            .any(|g| *g == id || (!name.is_empty() && g == name))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
