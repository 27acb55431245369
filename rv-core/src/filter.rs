use std::path::Path;

use tracing::{info, warn};

pub const CLASS_FILTER_FILE: &str = "class_filter";
pub const INCLUDED_CLASS_FILE: &str = "included_class";

/// Substring patterns over class descriptors. A non-empty allow-list wins over the deny-list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassFilter {
    included: Vec<String>,
    excluded: Vec<String>,
}

impl ClassFilter {
    pub fn new(included: Vec<String>, excluded: Vec<String>) -> Self {
        Self { included, excluded }
    }

    pub fn from_texts(included: Option<&str>, excluded: Option<&str>) -> Self {
        Self {
            included: included.map(patterns).unwrap_or_default(),
            excluded: excluded.map(patterns).unwrap_or_default(),
        }
    }

    /// Reads `included_class` and `class_filter` from the package directory.
    pub fn load(package_dir: &Path) -> Self {
        let included = read_patterns(&package_dir.join(INCLUDED_CLASS_FILE));
        let excluded = read_patterns(&package_dir.join(CLASS_FILTER_FILE));
        Self::new(included, excluded)
    }

    pub fn should_trace(&self, descriptor: &str) -> bool {
        if !self.included.is_empty() {
            return self
                .included
                .iter()
                .any(|pattern| descriptor.contains(pattern.as_str()));
        }
        !self
            .excluded
            .iter()
            .any(|pattern| descriptor.contains(pattern.as_str()))
    }

    pub fn is_allow_list(&self) -> bool {
        !self.included.is_empty()
    }
}

fn patterns(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_patterns(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let patterns = patterns(&text);
            info!(path = %path.display(), count = patterns.len(), "class filter loaded");
            patterns
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "class filter unreadable, ignoring");
            Vec::new()
        }
    }
}
