use std::path::{Path, PathBuf};

use revealer::{DumpError, DumperConfig, FlatTraceError, OUTPUT_DIR_NAME, RecordError};

pub const DEFAULT_DATA_ROOT: &str = "/data/data";
pub const DEFAULT_RELOAD_SIGNAL: i32 = 44;

pub const ENV_DATA_ROOT: &str = "RV_DATA_ROOT";
pub const ENV_RELOAD_SIGNAL: &str = "RV_RELOAD_SIGNAL";
pub const ENV_PACKAGE: &str = "RV_PACKAGE";

#[derive(Debug)]
pub enum AgentError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Config(String),
    Decode {
        path: PathBuf,
        source: RecordError,
    },
    Trace(FlatTraceError),
    Dump(DumpError),
    Json(serde_json::Error),
    Signal {
        signal: i32,
        source: std::io::Error,
    },
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            AgentError::Config(message) => write!(f, "invalid configuration: {message}"),
            AgentError::Decode { path, source } => {
                write!(f, "cannot decode {}: {source}", path.display())
            }
            AgentError::Trace(err) => write!(f, "invalid trace: {err}"),
            AgentError::Dump(err) => write!(f, "dumper failed: {err}"),
            AgentError::Json(err) => write!(f, "json encoding failed: {err}"),
            AgentError::Signal { signal, source } => {
                write!(f, "cannot watch signal {signal}: {source}")
            }
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Io { source, .. } | AgentError::Signal { source, .. } => Some(source),
            AgentError::Decode { source, .. } => Some(source),
            AgentError::Trace(err) => Some(err),
            AgentError::Dump(err) => Some(err),
            AgentError::Json(err) => Some(err),
            AgentError::Config(_) => None,
        }
    }
}

impl From<DumpError> for AgentError {
    fn from(err: DumpError) -> Self {
        AgentError::Dump(err)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Json(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub data_root: PathBuf,
    pub reload_signal: i32,
    /// Treats the process as a target of this package without consulting its command line.
    pub package: Option<String>,
    /// Process to inspect instead of the current one.
    pub pid: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            reload_signal: DEFAULT_RELOAD_SIGNAL,
            package: None,
            pid: None,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AgentError> {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();
        if let Some(root) = value(ENV_DATA_ROOT) {
            config.data_root = PathBuf::from(root);
        }
        if let Some(raw) = value(ENV_RELOAD_SIGNAL) {
            config.reload_signal = parse_signal(&raw)?;
        }
        config.package = value(ENV_PACKAGE).map(|package| package.trim().to_string());
        Ok(config)
    }

    pub fn effective_pid(&self) -> u32 {
        self.pid.unwrap_or_else(std::process::id)
    }

    pub fn package_dir(&self, package: &str) -> PathBuf {
        self.data_root.join(package)
    }

    /// Dumper settings for a process traced on behalf of `package`.
    pub fn dumper_config(&self, package: &str, pid: u32) -> DumperConfig {
        let package_dir = self.package_dir(package);
        DumperConfig {
            output_dir: package_dir.join(OUTPUT_DIR_NAME),
            package_dir,
            pid,
            random_prefix: None,
            write_records: true,
        }
    }
}

pub fn parse_signal(raw: &str) -> Result<i32, AgentError> {
    let signal: i32 = raw
        .trim()
        .parse()
        .map_err(|_| AgentError::Config(format!("reload signal must be a number, got: {raw}")))?;
    if signal <= 0 {
        return Err(AgentError::Config(format!(
            "reload signal must be positive, got: {signal}"
        )));
    }
    Ok(signal)
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AgentError + '_ {
    move |source| AgentError::Io {
        path: path.to_path_buf(),
        source,
    }
}
