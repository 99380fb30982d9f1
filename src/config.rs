//! Configuration for taskline paths and defaults.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TASKLINE_HOME, TASKLINE_PROCESSES)
//! 2. Config file (.taskline/config.yaml)
//! 3. Defaults (~/.taskline)
//!
//! Config file discovery:
//! - Searches current directory and parents for .taskline/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::checkpoint::ResumePolicy;
use crate::core::limits::RunLimits;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Process definitions directory (relative to config file)
    pub processes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_steps: Option<u32>,
    pub max_input_bytes: Option<u64>,
    pub max_output_bytes: Option<u64>,
    pub step_timeout_seconds: Option<u64>,
    pub run_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    pub timeout_seconds: Option<u64>,
    pub on_timeout: Option<ResumePolicy>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to taskline home (engine state)
    pub home: PathBuf,
    /// Absolute path to process definitions
    pub processes: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Agent settings
    pub agent: AgentSettings,
    /// Default run limits (process files can override)
    pub limits: RunLimits,
    /// Checkpoint settings
    pub checkpoint: CheckpointSettings,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub command: String,
    pub args: Vec<String>,
    pub prompt_template: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            prompt_template: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointSettings {
    /// How long to wait for review before applying `on_timeout`.
    /// None means block until answered.
    pub timeout_seconds: Option<u64>,
    pub on_timeout: ResumePolicy,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".taskline").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge limit overrides from the config file onto the defaults
fn merge_limits(overrides: Option<&LimitsConfig>) -> RunLimits {
    let mut limits = RunLimits::default();

    if let Some(overrides) = overrides {
        if let Some(v) = overrides.max_steps {
            limits.max_steps = v;
        }
        if let Some(v) = overrides.max_input_bytes {
            limits.max_input_bytes = v;
        }
        if let Some(v) = overrides.max_output_bytes {
            limits.max_output_bytes = v;
        }
        if let Some(v) = overrides.step_timeout_seconds {
            limits.step_timeout_seconds = v;
        }
        if let Some(v) = overrides.run_timeout_seconds {
            limits.run_timeout_seconds = v;
        }
    }

    limits
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".taskline");

    // Check for config file
    let config_file = find_config_file();

    let (home, processes, agent, limits, checkpoint) = if let Some(ref config_path) = config_file {
        // Config file found - use it as base
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .taskline/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent() // .taskline/
            .and_then(|p| p.parent()) // project root
            .unwrap_or(Path::new("."));

        // Resolve home path
        let home = if let Ok(env_home) = std::env::var("TASKLINE_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to .taskline/ directory
            let taskline_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(taskline_dir, home_path)
        } else {
            default_home.clone()
        };

        // Resolve processes path
        let processes = if let Ok(env_procs) = std::env::var("TASKLINE_PROCESSES") {
            PathBuf::from(env_procs)
        } else if let Some(ref procs_path) = config.paths.processes {
            resolve_path(base_dir, procs_path)
        } else {
            home.join("processes")
        };

        // Agent settings
        let defaults = AgentSettings::default();
        let agent = match &config.agent {
            Some(a) => AgentSettings {
                command: a.command.clone().unwrap_or(defaults.command),
                args: if a.args.is_empty() {
                    defaults.args
                } else {
                    a.args.clone()
                },
                prompt_template: a.prompt_template.clone(),
            },
            None => defaults,
        };

        let limits = merge_limits(config.limits.as_ref());

        let checkpoint = CheckpointSettings {
            timeout_seconds: config.checkpoint.as_ref().and_then(|c| c.timeout_seconds),
            on_timeout: config
                .checkpoint
                .as_ref()
                .and_then(|c| c.on_timeout)
                .unwrap_or_default(),
        };

        (home, processes, agent, limits, checkpoint)
    } else {
        // No config file - use env vars or defaults
        let home = std::env::var("TASKLINE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let processes = std::env::var("TASKLINE_PROCESSES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("processes"));

        (
            home,
            processes,
            AgentSettings::default(),
            RunLimits::default(),
            CheckpointSettings::default(),
        )
    };

    Ok(ResolvedConfig {
        home,
        processes,
        config_file,
        agent,
        limits,
        checkpoint,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the taskline home directory (engine state).
pub fn taskline_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($TASKLINE_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

/// Get the process definitions directory
pub fn processes_dir() -> Result<PathBuf> {
    Ok(config()?.processes.clone())
}

/// Resolve a process definition path by name.
///
/// A name containing a path separator or ending in .yaml is used as-is,
/// otherwise the name is looked up under the processes directory.
pub fn process_path(name: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(name);
    if name.ends_with(".yaml") || name.ends_with(".yml") || name.contains(std::path::MAIN_SEPARATOR)
    {
        return Ok(direct);
    }

    Ok(processes_dir()?.join(format!("{}.yaml", name)))
}
