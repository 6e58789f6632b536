//! Sandbox tunables, loaded from an optional `guardrail.toml` in the
//! app-private data directory and merged with caller overrides (highest
//! precedence).

use std::path::PathBuf;

use serde::Deserialize;

/// Wall-clock ceiling no request may exceed, whatever it asks for.
pub const HARD_TIMEOUT_MS: u64 = 10 * 60 * 1_000;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 100 * 1024;
const DEFAULT_MAX_CHECKPOINTS: usize = 50;

#[derive(Deserialize, Debug, Clone)]
pub struct SandboxConfig {
    /// Timeout applied when a request does not ask for one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Per-stream byte cap applied when a request does not ask for one.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Checkpoints retained before oldest-first pruning.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,

    /// Where checkpoint records live. Defaults to
    /// `<data_dir>/guardrail/checkpoints`.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            max_checkpoints: default_max_checkpoints(),
            checkpoint_dir: None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_max_checkpoints() -> usize {
    DEFAULT_MAX_CHECKPOINTS
}

/// Optional overrides (e.g. from the host's settings screen).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub default_timeout_ms: Option<u64>,
    pub max_output_bytes: Option<usize>,
    pub max_checkpoints: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
}

impl SandboxConfig {
    /// Load `guardrail.toml` if present, then apply `overrides`.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> std::io::Result<Self> {
        Ok(Self::load_from_toml()?.apply_overrides(overrides))
    }

    fn apply_overrides(mut self, overrides: ConfigOverrides) -> Self {
        // Destructured fully so a new override field cannot be forgotten.
        let ConfigOverrides {
            default_timeout_ms,
            max_output_bytes,
            max_checkpoints,
            checkpoint_dir,
        } = overrides;
        if let Some(v) = default_timeout_ms {
            self.default_timeout_ms = v;
        }
        if let Some(v) = max_output_bytes {
            self.max_output_bytes = v;
        }
        if let Some(v) = max_checkpoints {
            self.max_checkpoints = v;
        }
        if let Some(v) = checkpoint_dir {
            self.checkpoint_dir = Some(v);
        }
        self
    }

    fn load_from_toml() -> std::io::Result<Self> {
        let path = app_data_dir()?.join("guardrail.toml");
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str::<Self>(&contents).map_err(|e| {
                tracing::error!("failed to parse {}: {e}", path.display());
                std::io::Error::new(std::io::ErrorKind::InvalidData, e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Effective timeout for a request: its own ask, clamped to the hard
    /// ceiling, or the configured default.
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_ms)
            .min(HARD_TIMEOUT_MS)
    }

    /// Resolved checkpoints directory.
    pub fn checkpoint_dir(&self) -> std::io::Result<PathBuf> {
        match &self.checkpoint_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(app_data_dir()?.join("checkpoints")),
        }
    }
}

fn app_data_dir() -> std::io::Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("guardrail"))
        .ok_or_else(|| std::io::Error::other("could not determine the application data directory"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_timeout_is_clamped_to_ceiling() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.effective_timeout_ms(Some(100)), 100);
        assert_eq!(
            cfg.effective_timeout_ms(Some(u64::MAX)),
            HARD_TIMEOUT_MS
        );
        assert_eq!(cfg.effective_timeout_ms(None), cfg.default_timeout_ms);
    }

    #[test]
    fn overrides_take_precedence_over_loaded_values() {
        let cfg = SandboxConfig::default().apply_overrides(ConfigOverrides {
            max_checkpoints: Some(5),
            checkpoint_dir: Some(PathBuf::from("/tmp/ckpts")),
            ..ConfigOverrides::default()
        });
        assert_eq!(cfg.max_checkpoints, 5);
        assert_eq!(cfg.checkpoint_dir, Some(PathBuf::from("/tmp/ckpts")));
        // Untouched fields keep their defaults.
        assert_eq!(cfg.default_timeout_ms, 10_000);
    }
}
