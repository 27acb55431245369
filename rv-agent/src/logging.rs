use owo_colors::OwoColorize;
use std::sync::OnceLock;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Installs the process-wide subscriber. `RUST_LOG` overrides the `info` default.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = detect_ansi();
    let _ = ANSI_ENABLED.set(ansi);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_target() -> String {
    if ansi_enabled() {
        format!("{}", "TARGET".bright_cyan().bold())
    } else {
        "TARGET".to_string()
    }
}

pub fn category_rules() -> String {
    if ansi_enabled() {
        format!("{}", "RULES".bright_yellow().bold())
    } else {
        "RULES".to_string()
    }
}

pub fn category_dump() -> String {
    if ansi_enabled() {
        format!("{}", "DUMP".bright_green().bold())
    } else {
        "DUMP".to_string()
    }
}

/// Colors a table tag the way `inspect` prints it.
pub fn table_label(tag: &str) -> String {
    if !ansi_enabled() {
        return tag.to_string();
    }

    match tag {
        "string" | "type" => format!("{}", tag.bright_blue()),
        "proto" | "field" | "method" => format!("{}", tag.bright_magenta()),
        "class" | "sv" => format!("{}", tag.bright_yellow()),
        "ef" | "em" => format!("{}", tag.bright_cyan()),
        "code" => format!("{}", tag.bright_green()),
        _ => format!("{}", tag.bright_white()),
    }
}

pub fn verdict_label(accepted: bool) -> String {
    let text = if accepted { "ok" } else { "rejected" };
    if !ansi_enabled() {
        return text.to_string();
    }

    if accepted {
        format!("{}", text.bright_green())
    } else {
        format!("{}", text.bright_red())
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }

    supports_color::on_cached(Stream::Stdout).is_some()
}
