//! Decides whether a process is one we should instrument.
//!
//! The package name is the first NUL-terminated token of `/proc/<pid>/cmdline`
//! with any `:subprocess` suffix removed. A package may list its own patterns
//! in `reveal_filter`; without that file a built-in pattern list applies.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{AgentConfig, AgentError, io_error};
use crate::logging;

pub const REVEAL_FILTER_FILE: &str = "reveal_filter";
pub const DEFAULT_TARGET_PATTERNS: [&str; 7] =
    ["zhenyu", "ecspride", "mit", "example", "cert", "snt", "wayne"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProcess {
    pub pid: u32,
    pub cmdline: String,
    pub package: String,
    pub package_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSource {
    Default,
    RevealFilter(PathBuf),
}

pub fn cmdline_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/cmdline"))
}

pub fn read_cmdline(pid: u32) -> Result<String, AgentError> {
    let path = cmdline_path(pid);
    let bytes = std::fs::read(&path).map_err(io_error(&path))?;
    Ok(first_token(&bytes))
}

fn first_token(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

pub fn package_name(cmdline: &str) -> &str {
    match cmdline.find(':') {
        Some(pos) => &cmdline[..pos],
        None => cmdline,
    }
}

/// Patterns that mark `package_dir`'s processes as targets.
pub fn target_patterns(package_dir: &Path) -> (Vec<String>, PatternSource) {
    let path = package_dir.join(REVEAL_FILTER_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let patterns = text
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            (patterns, PatternSource::RevealFilter(path))
        }
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "reveal filter unreadable, using defaults");
            }
            let defaults = DEFAULT_TARGET_PATTERNS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect();
            (defaults, PatternSource::Default)
        }
    }
}

pub fn matches_target(cmdline: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| cmdline.contains(pattern.as_str()))
}

/// Classifies an already-read command line.
pub fn classify(config: &AgentConfig, pid: u32, cmdline: &str) -> Option<TargetProcess> {
    let package = match &config.package {
        Some(package) => package.clone(),
        None => {
            let package = package_name(cmdline);
            if package.is_empty() {
                return None;
            }
            let (patterns, source) = target_patterns(&config.package_dir(package));
            if !matches_target(cmdline, &patterns) {
                return None;
            }
            info!(
                "{} {package} matched {}",
                logging::category_target(),
                match source {
                    PatternSource::Default => "default patterns".to_string(),
                    PatternSource::RevealFilter(path) => path.display().to_string(),
                }
            );
            package.to_string()
        }
    };
    Some(TargetProcess {
        pid,
        cmdline: cmdline.to_string(),
        package_dir: config.package_dir(&package),
        package,
    })
}

/// Reads the configured (or current) process's command line and classifies it.
/// An unreadable command line disables tracing unless a package is configured.
pub fn detect(config: &AgentConfig) -> Option<TargetProcess> {
    let pid = config.effective_pid();
    match read_cmdline(pid) {
        Ok(cmdline) => classify(config, pid, &cmdline),
        Err(_) if config.package.is_some() => classify(config, pid, ""),
        Err(err) => {
            warn!(pid, "{} lookup failed: {err}", logging::category_target());
            None
        }
    }
}
