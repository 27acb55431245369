use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::source::MethodSignature;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceBranchRule {
    pub signature: MethodSignature,
    pub pc: u32,
    pub offset: i32,
    pub reached: bool,
}

impl std::fmt::Display for ForceBranchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} pc={} offset={}", self.signature, self.pc, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    EmptyLine,
    TooFewItems { found: usize },
    ParamCountMismatch { declared: usize, items: usize },
    InvalidNumber { field: &'static str, value: String },
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleError::EmptyLine => f.write_str("empty line"),
            RuleError::TooFewItems { found } => write!(f, "too few items ({found})"),
            RuleError::ParamCountMismatch { declared, items } => write!(
                f,
                "declares {declared} parameters but has {items} items (expected {})",
                declared + 7
            ),
            RuleError::InvalidNumber { field, value } => {
                write!(f, "invalid {field} '{value}'")
            }
        }
    }
}

impl std::error::Error for RuleError {}

/// `class method shorty returnType pc offset paramCount p1..pN`
pub fn parse_rule(line: &str) -> Result<ForceBranchRule, RuleError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(RuleError::EmptyLine);
    }
    let items: Vec<&str> = line.split(' ').filter(|item| !item.is_empty()).collect();
    if items.len() <= 6 {
        return Err(RuleError::TooFewItems { found: items.len() });
    }
    let declared: usize = parse_number("parameter count", items[6])?;
    if items.len() != declared + 7 {
        return Err(RuleError::ParamCountMismatch {
            declared,
            items: items.len(),
        });
    }
    Ok(ForceBranchRule {
        signature: MethodSignature {
            class: items[0].to_string(),
            name: items[1].to_string(),
            shorty: items[2].to_string(),
            return_type: items[3].to_string(),
            param_types: items[7..].iter().map(|param| param.to_string()).collect(),
        },
        pc: parse_number("pc", items[4])?,
        offset: parse_number("offset", items[5])?,
        reached: false,
    })
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, RuleError> {
    value.parse().map_err(|_| RuleError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Parses every line; rejected lines come back with their 1-based line number.
pub fn parse_rules(text: &str) -> (Vec<ForceBranchRule>, Vec<(usize, RuleError)>) {
    let mut rules = Vec::new();
    let mut rejected = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        match parse_rule(line) {
            Ok(rule) => rules.push(rule),
            Err(err) => rejected.push((line_no + 1, err)),
        }
    }
    (rules, rejected)
}

#[derive(Debug, Default)]
struct RuleTable {
    rules: Vec<ForceBranchRule>,
    force_execution: bool,
}

/// Loaded rules, each firing at most once.
#[derive(Debug, Default)]
pub struct ForceBranchController {
    table: Mutex<RuleTable>,
}

impl ForceBranchController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rule table with the accepted lines of `text`.
    pub fn load(&self, text: &str) -> usize {
        let (rules, rejected) = parse_rules(text);
        for (line_no, err) in &rejected {
            warn!(line = line_no, "skipping force branch rule: {err}");
        }
        for rule in &rules {
            info!("force branch added: {rule}");
        }
        let count = rules.len();
        let mut table = self.table.lock();
        table.force_execution = count > 0;
        table.rules = rules;
        count
    }

    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.rules.clear();
        table.force_execution = false;
    }

    pub fn force_execution(&self) -> bool {
        self.table.lock().force_execution
    }

    pub fn rule_count(&self) -> usize {
        self.table.lock().rules.len()
    }

    /// Forced offset for `pc` of the executing method, or `None` to take the normal path.
    pub fn resolve(&self, pc: u32, signature: impl FnOnce() -> Option<MethodSignature>) -> Option<i32> {
        let mut table = self.table.lock();
        if !table.force_execution || table.rules.is_empty() {
            return None;
        }
        let signature = signature()?;
        for rule in table
            .rules
            .iter_mut()
            .filter(|rule| rule.pc == pc && rule.signature == signature)
        {
            if rule.reached {
                debug!("force branch already reached: {rule}");
                continue;
            }
            rule.reached = true;
            info!("force branch fired: {rule}");
            return Some(rule.offset);
        }
        None
    }

    pub fn snapshot(&self) -> Vec<ForceBranchRule> {
        self.table.lock().rules.clone()
    }
}
