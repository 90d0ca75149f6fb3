use crate::error::{Result, WardenError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How an app is invoked: the executable itself, or a script handed to an
/// interpreter. Resolved once when the spec is built so launch sites never
/// re-branch on the raw `interpreter` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Run the program directly
    Direct { program: PathBuf },

    /// Run `interpreter script [args..]`
    ViaInterpreter {
        interpreter: PathBuf,
        script: PathBuf,
    },
}

impl LaunchTarget {
    /// The binary that ends up in the exec call
    pub fn program(&self) -> &Path {
        match self {
            LaunchTarget::Direct { program } => program,
            LaunchTarget::ViaInterpreter { interpreter, .. } => interpreter,
        }
    }
}

/// Immutable description of one app to supervise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    /// App name (unique identifier)
    pub name: String,

    /// What to execute
    pub target: LaunchTarget,

    /// Command-line arguments
    pub args: Vec<String>,

    /// Working directory for the process
    pub cwd: Option<PathBuf>,

    /// Environment variables overlaid onto the inherited environment
    pub env: HashMap<String, String>,

    /// Restart the process once its resident memory climbs above this
    /// many bytes
    pub memory_ceiling: Option<u64>,

    /// Whether to automatically restart on crash
    pub auto_restart: bool,

    /// Filesystem-watch flag; stored but not acted on
    pub watch: bool,
}

impl AppSpec {
    /// Spec for an app launched directly
    pub fn direct(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            target: LaunchTarget::Direct {
                program: program.into(),
            },
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            memory_ceiling: None,
            auto_restart: true,
            watch: false,
        }
    }

    /// Spec for a script run through an interpreter
    pub fn via_interpreter(
        name: impl Into<String>,
        interpreter: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            target: LaunchTarget::ViaInterpreter {
                interpreter: interpreter.into(),
                script: script.into(),
            },
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            memory_ceiling: None,
            auto_restart: true,
            watch: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling = Some(bytes);
        self
    }

    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<()> {
        // Validate name
        if self.name.is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        // Validate the launch target
        match &self.target {
            LaunchTarget::Direct { program } => {
                if program.as_os_str().is_empty() {
                    return Err(WardenError::MissingConfigField("script".to_string()));
                }
            }
            LaunchTarget::ViaInterpreter {
                interpreter,
                script,
            } => {
                if interpreter.as_os_str().is_empty() {
                    return Err(WardenError::MissingConfigField("interpreter".to_string()));
                }
                if script.as_os_str().is_empty() {
                    return Err(WardenError::MissingConfigField("script".to_string()));
                }
            }
        }

        // Validate memory ceiling
        if self.memory_ceiling == Some(0) {
            return Err(WardenError::InvalidConfig(
                "memory ceiling must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_spec_defaults() {
        let spec = AppSpec::direct("web", "/usr/bin/myapp");

        assert_eq!(spec.name, "web");
        assert_eq!(spec.target.program(), Path::new("/usr/bin/myapp"));
        assert!(spec.args.is_empty());
        assert!(spec.cwd.is_none());
        assert!(spec.env.is_empty());
        assert!(spec.memory_ceiling.is_none());
        assert!(spec.auto_restart);
        assert!(!spec.watch);
    }

    #[test]
    fn test_interpreter_spec_program_is_interpreter() {
        let spec = AppSpec::via_interpreter("api", "/usr/bin/python3", "worker.py");

        assert_eq!(spec.target.program(), Path::new("/usr/bin/python3"));
        match &spec.target {
            LaunchTarget::ViaInterpreter { script, .. } => {
                assert_eq!(script, &PathBuf::from("worker.py"));
            }
            other => panic!("expected interpreter target, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_methods() {
        let spec = AppSpec::direct("web", "/usr/bin/myapp")
            .with_args(["--port", "8080"])
            .with_cwd("/srv/web")
            .with_env("MODE", "production")
            .with_memory_ceiling(500 * 1024 * 1024)
            .with_auto_restart(false);

        assert_eq!(spec.args, vec!["--port", "8080"]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/srv/web")));
        assert_eq!(spec.env.get("MODE"), Some(&"production".to_string()));
        assert_eq!(spec.memory_ceiling, Some(524_288_000));
        assert!(!spec.auto_restart);
    }

    #[test]
    fn test_validate_valid_spec() {
        let spec = AppSpec::direct("web", "/bin/echo");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_name() {
        let spec = AppSpec::direct("", "/bin/echo");
        assert!(matches!(
            spec.validate(),
            Err(WardenError::MissingConfigField(field)) if field == "name"
        ));
    }

    #[test]
    fn test_validate_empty_program() {
        let spec = AppSpec::direct("web", "");
        assert!(matches!(
            spec.validate(),
            Err(WardenError::MissingConfigField(field)) if field == "script"
        ));
    }

    #[test]
    fn test_validate_empty_interpreter() {
        let spec = AppSpec::via_interpreter("web", "", "worker.py");
        assert!(matches!(
            spec.validate(),
            Err(WardenError::MissingConfigField(field)) if field == "interpreter"
        ));
    }

    #[test]
    fn test_validate_zero_memory_ceiling() {
        let mut spec = AppSpec::direct("web", "/bin/echo");
        spec.memory_ceiling = Some(0);
        assert!(matches!(
            spec.validate(),
            Err(WardenError::InvalidConfig(_))
        ));
    }
}
