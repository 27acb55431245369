mod config;
mod inspect;
mod logging;
mod process;
mod runtime;
mod supervisor;

pub use config::{
    AgentConfig, AgentError, DEFAULT_DATA_ROOT, DEFAULT_RELOAD_SIGNAL, ENV_DATA_ROOT, ENV_PACKAGE,
    ENV_RELOAD_SIGNAL, parse_signal,
};
pub use inspect::{
    Inspection, RecordView, RulesReport, SegmentView, check_rules, inspect_file, record_view,
    render_json, render_text,
};
pub use logging::init as init_logging;
pub use process::{
    DEFAULT_TARGET_PATTERNS, PatternSource, REVEAL_FILTER_FILE, TargetProcess, classify,
    cmdline_path, detect, matches_target, package_name, read_cmdline, target_patterns,
};
pub use runtime::Agent;
pub use supervisor::ReloadSupervisor;
