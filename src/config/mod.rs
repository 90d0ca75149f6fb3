use crate::error::{Result, WardenError};
use crate::process::spec::{AppSpec, LaunchTarget};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// One app entry as written in a config file
///
/// This is the external, file-facing shape; [`AppConfig::into_spec`] turns
/// it into the immutable [`AppSpec`] the supervisor works with.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// App name (unique identifier)
    pub name: String,

    /// Path to the script or executable to run
    pub script: PathBuf,

    /// Command-line arguments: a list, or one string split on whitespace
    #[serde(default)]
    pub args: ArgList,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Interpreter to run the script with; "none" or empty means the
    /// script is executed directly
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Whether to automatically restart on crash
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Filesystem-watch flag; accepted and stored, not acted on
    #[serde(default)]
    pub watch: bool,

    /// Memory ceiling, either bytes or a size string like "500M"
    #[serde(default)]
    pub max_memory_restart: Option<MemoryLimit>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// Default value functions for serde
fn default_autorestart() -> bool {
    true
}

/// Arguments as either one whitespace-separated string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArgList {
    Line(String),
    List(Vec<String>),
}

impl Default for ArgList {
    fn default() -> Self {
        ArgList::List(Vec::new())
    }
}

impl ArgList {
    /// Flatten into the argument vector handed to the launcher
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ArgList::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            ArgList::List(args) => args,
        }
    }
}

/// Memory ceiling as either raw bytes or a human-readable size string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MemoryLimit {
    Bytes(u64),
    Text(String),
}

impl MemoryLimit {
    /// Resolve to bytes
    pub fn to_bytes(&self) -> Result<u64> {
        match self {
            MemoryLimit::Bytes(bytes) => Ok(*bytes),
            MemoryLimit::Text(text) => parse_memory_limit(text),
        }
    }
}

/// Parse a size string like "500M", "1G" or "2048" into bytes
///
/// Suffixes are binary multiples: K = 1024, M = 1024^2, G = 1024^3. A
/// trailing B is accepted ("500MB").
pub fn parse_memory_limit(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WardenError::InvalidConfig(
            "Empty memory limit".to_string(),
        ));
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);

    let value: u64 = digits.parse().map_err(|_| {
        WardenError::InvalidConfig(format!("Invalid memory limit: {}", input))
    })?;

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        other => {
            return Err(WardenError::InvalidConfig(format!(
                "Unknown size suffix '{}' in memory limit: {}",
                other, input
            )));
        }
    };

    value.checked_mul(multiplier).ok_or_else(|| {
        WardenError::InvalidConfig(format!("Memory limit too large: {}", input))
    })
}

impl AppConfig {
    /// Load app configurations from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Vec<AppConfig>> {
        // Read file contents
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::ConfigError(format!("Failed to read config file: {}", e)))?;

        // Determine format based on file extension
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let configs = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(WardenError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        // Expand environment variables in all configs
        let expanded: Vec<AppConfig> = configs
            .into_iter()
            .map(|mut config| {
                config.expand_env_vars();
                config
            })
            .collect();

        Ok(expanded)
    }

    /// Parse a TOML configuration file
    fn parse_toml(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        struct ConfigFile {
            #[serde(default)]
            apps: Vec<AppConfig>,
            #[serde(flatten)]
            single: Option<AppConfig>,
        }

        let config_file: ConfigFile = toml::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        // Support both a single app and an apps array
        if let Some(single) = config_file.single {
            Ok(vec![single])
        } else if !config_file.apps.is_empty() {
            Ok(config_file.apps)
        } else {
            Err(WardenError::InvalidConfig(
                "No app configuration found in file".to_string(),
            ))
        }
    }

    /// Parse a JSON configuration file
    fn parse_json(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ConfigFile {
            Single(AppConfig),
            Multiple { apps: Vec<AppConfig> },
        }

        let config_file: ConfigFile = serde_json::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

        match config_file {
            ConfigFile::Single(config) => Ok(vec![config]),
            ConfigFile::Multiple { apps } => {
                if apps.is_empty() {
                    Err(WardenError::InvalidConfig(
                        "No app configuration found in file".to_string(),
                    ))
                } else {
                    Ok(apps)
                }
            }
        }
    }

    /// Turn this file entry into the spec the supervisor runs
    ///
    /// Resolves the interpreter setting into a launch target and the
    /// memory limit into bytes, then validates the result.
    pub fn into_spec(self) -> Result<AppSpec> {
        // Validate working directory exists if specified
        if let Some(ref cwd) = self.cwd {
            if !cwd.exists() {
                return Err(WardenError::InvalidConfig(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            if !cwd.is_dir() {
                return Err(WardenError::InvalidConfig(format!(
                    "Working directory is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        let memory_ceiling = match &self.max_memory_restart {
            Some(limit) => Some(limit.to_bytes()?),
            None => None,
        };

        // "none" (or nothing) means run the script itself
        let target = match self.interpreter.as_deref() {
            None | Some("") | Some("none") => LaunchTarget::Direct {
                program: self.script,
            },
            Some(interpreter) => LaunchTarget::ViaInterpreter {
                interpreter: PathBuf::from(interpreter),
                script: self.script,
            },
        };

        let spec = AppSpec {
            name: self.name,
            target,
            args: self.args.into_vec(),
            cwd: self.cwd,
            env: self.env,
            memory_ceiling,
            auto_restart: self.autorestart,
            watch: self.watch,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        // Expand in script path
        self.script = Self::expand_env_in_path(&self.script);

        // Expand in working directory
        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(Self::expand_env_in_path(cwd));
        }

        // Expand in the interpreter
        if let Some(ref interpreter) = self.interpreter {
            self.interpreter = Some(Self::expand_env_in_string(interpreter));
        }

        // Expand in arguments
        self.args = match &self.args {
            ArgList::Line(line) => ArgList::Line(Self::expand_env_in_string(line)),
            ArgList::List(args) => ArgList::List(
                args.iter()
                    .map(|arg| Self::expand_env_in_string(arg))
                    .collect(),
            ),
        };

        // Expand in environment variables (values only)
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Self::expand_env_in_string(v)))
            .collect();
    }

    /// Expand environment variables in a string
    fn expand_env_in_string(s: &str) -> String {
        let mut result = s.to_string();

        // Handle $VAR and ${VAR} syntax
        for (key, value) in std::env::vars() {
            result = result.replace(&format!("${{{}}}", key), &value);
            result = result.replace(&format!("${}", key), &value);
        }

        result
    }

    /// Expand environment variables in a path
    fn expand_env_in_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let expanded = Self::expand_env_in_string(&path_str);
        PathBuf::from(expanded)
    }
}

/// Load a config file and resolve every entry into an [`AppSpec`]
///
/// Rejects duplicate app names across the file.
pub fn load_specs(path: &Path) -> Result<Vec<AppSpec>> {
    let configs = AppConfig::from_file(path)?;

    let mut seen = HashSet::new();
    for config in &configs {
        if !seen.insert(config.name.clone()) {
            return Err(WardenError::InvalidConfig(format!(
                "Duplicate app name in {}: {}",
                path.display(),
                config.name
            )));
        }
    }

    configs.into_iter().map(AppConfig::into_spec).collect()
}
