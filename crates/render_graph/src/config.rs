//! Compile-time configuration: whether `compile()` also returns the
//! debug-dump text table and how verbosely barriers are logged.
//!
//! A `serde`-derived struct with TOML/RON round-trip helpers and a
//! matching `thiserror` error enum.

use serde::{Deserialize, Serialize};

/// Configuration trait shared with the rest of the engine's config types.
/// `RenderGraph::compile` does
/// not require a config to be loaded from disk — [`GraphCompileConfig::default`]
/// is a sensible, silent default — but callers that want TOML/RON-backed
/// settings get it for free.
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from a TOML or RON file, dispatched on extension.
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to a TOML or RON file, dispatched on extension.
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Errors from loading/saving a [`Config`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Underlying file I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The file's contents did not parse as the target format.
    #[error("parse error: {0}")]
    Parse(String),
    /// The value could not be serialized to the target format.
    #[error("serialization error: {0}")]
    Serialize(String),
    /// The path's extension is neither `.toml` nor `.ron`.
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// Logging verbosity for barriers `compile()` synthesizes. Each level
/// is a superset of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierLogLevel {
    /// Nothing beyond the usual `log::warn!` liveness diagnostics.
    Quiet,
    /// One `log::debug!` line per synthesized `SyncPass`.
    PerSyncPass,
    /// One `log::trace!` line per individual image/buffer barrier.
    PerBarrier,
}

impl Default for BarrierLogLevel {
    fn default() -> Self {
        Self::Quiet
    }
}

/// Knobs for [`crate::graph::RenderGraph::compile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCompileConfig {
    /// When `true`, `compile()` also returns the human-readable debug-dump
    /// text table (see [`crate::debug_dump::dump`]).
    pub emit_debug_dump: bool,
    /// Verbosity of barrier logging during `compile()`.
    pub barrier_log_level: BarrierLogLevel,
}

impl Default for GraphCompileConfig {
    fn default() -> Self {
        Self {
            emit_debug_dump: cfg!(debug_assertions),
            barrier_log_level: BarrierLogLevel::default(),
        }
    }
}

impl Config for GraphCompileConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip() {
        let cfg = GraphCompileConfig {
            emit_debug_dump: true,
            barrier_log_level: BarrierLogLevel::PerBarrier,
        };
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: GraphCompileConfig = toml::from_str(&toml).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn ron_round_trip() {
        let cfg = GraphCompileConfig {
            emit_debug_dump: false,
            barrier_log_level: BarrierLogLevel::PerSyncPass,
        };
        let ron = ron::ser::to_string(&cfg).unwrap();
        let parsed: GraphCompileConfig = ron::from_str(&ron).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn unsupported_extension_rejected() {
        let cfg = GraphCompileConfig::default();
        let err = cfg.save_to_file("/tmp/render_graph_config_test.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }
}
