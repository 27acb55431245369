use std::{fs, path::PathBuf};

use agent::{
    Agent, AgentConfig, check_rules, detect, init_logging, inspect_file, render_json, render_text,
};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_cli_args(&args) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("error: {err}\n");
            print_cli_help();
            return Err(err.into());
        }
    };

    match &cli.command {
        Command::Help => {
            print_cli_help();
            return Ok(());
        }
        Command::Version => {
            println!("{}", binary_version_text());
            return Ok(());
        }
        _ => {}
    }

    init_logging()?;
    let mut config = AgentConfig::from_env()?;
    cli.apply(&mut config);

    match cli.command {
        Command::Inspect(path) => {
            let inspection = inspect_file(&path)?;
            if cli.json {
                println!("{}", render_json(&inspection)?);
            } else {
                print!("{}", render_text(&inspection));
            }
        }
        Command::Rules(path) => {
            let text = fs::read_to_string(&path)?;
            let report = check_rules(&text);
            print!("{}", report.render());
            if !report.rejected.is_empty() {
                return Err(format!(
                    "{} rejected line(s) in {}",
                    report.rejected.len(),
                    path.display()
                )
                .into());
            }
        }
        Command::Probe => match detect(&config) {
            Some(target) => println!(
                "target pid={} package={} dir={}",
                target.pid,
                target.package,
                target.package_dir.display()
            ),
            None => println!("not a target pid={}", config.effective_pid()),
        },
        Command::Watch => watch(&config)?,
        Command::Reload => send_reload(&config)?,
        Command::Help | Command::Version => {}
    }
    Ok(())
}

fn watch(config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let Some(agent) = Agent::start(config)? else {
        return Ok(());
    };
    info!(
        "watching pid={} signal={}, ctrl-c to stop",
        agent.target().pid,
        config.reload_signal
    );
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let waited = runtime.block_on(tokio::signal::ctrl_c());
    agent.shutdown();
    waited?;
    Ok(())
}

#[cfg(unix)]
fn send_reload(config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pid = config.pid.ok_or("reload requires --pid")?;
    let target = libc::pid_t::try_from(pid)?;
    // SAFETY: kill(2) takes plain integers and has no memory preconditions.
    let rc = unsafe { libc::kill(target, config.reload_signal) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    info!("sent signal {} to pid {pid}", config.reload_signal);
    Ok(())
}

#[cfg(not(unix))]
fn send_reload(_config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    Err("reload signals are only supported on unix".into())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Command {
    #[default]
    Help,
    Version,
    Inspect(PathBuf),
    Rules(PathBuf),
    Probe,
    Watch,
    Reload,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct CliConfig {
    command: Command,
    json: bool,
    pid: Option<u32>,
    data_root: Option<PathBuf>,
    package: Option<String>,
    signal: Option<i32>,
}

impl CliConfig {
    /// Command-line values win over the environment.
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(root) = &self.data_root {
            config.data_root = root.clone();
        }
        if let Some(signal) = self.signal {
            config.reload_signal = signal;
        }
        if let Some(package) = &self.package {
            config.package = Some(package.clone());
        }
        if self.pid.is_some() {
            config.pid = self.pid;
        }
    }
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut iter = args.iter().cloned().peekable();
    let mut cli = CliConfig::default();
    let mut positional = Vec::new();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliConfig::default()),
            "-V" | "--version" => {
                return Ok(CliConfig {
                    command: Command::Version,
                    ..CliConfig::default()
                });
            }
            "--json" => cli.json = true,
            "--pid" => {
                let value = next_arg_value("--pid", &mut iter)?;
                cli.pid = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| format!("invalid --pid: {value}"))?,
                );
            }
            "--data-root" => {
                cli.data_root = Some(PathBuf::from(next_arg_value("--data-root", &mut iter)?));
            }
            "--package" => {
                cli.package = Some(next_arg_value("--package", &mut iter)?);
            }
            "--signal" => {
                let value = next_arg_value("--signal", &mut iter)?;
                cli.signal = Some(agent::parse_signal(&value).map_err(|err| err.to_string())?);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("unknown argument: {arg}"));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    cli.command = match positional.next().as_deref() {
        None => Command::Help,
        Some("inspect") => Command::Inspect(PathBuf::from(
            positional.next().ok_or("inspect requires a table file")?,
        )),
        Some("rules") => Command::Rules(PathBuf::from(
            positional.next().ok_or("rules requires a rule file")?,
        )),
        Some("probe") => Command::Probe,
        Some("watch") => Command::Watch,
        Some("reload") => Command::Reload,
        Some(other) => return Err(format!("unknown command: {other}")),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    if cli.json && !matches!(cli.command, Command::Inspect(_)) {
        return Err("--json only applies to inspect".to_string());
    }
    if cli.command == Command::Reload && cli.pid.is_none() {
        return Err("reload requires --pid".to_string());
    }
    Ok(cli)
}

fn next_arg_value(
    flag: &str,
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
) -> Result<String, String> {
    let value = args
        .next()
        .ok_or_else(|| format!("missing value for {flag}"))?;
    if value.trim().is_empty() {
        return Err(format!("value for {flag} cannot be empty"));
    }
    Ok(value)
}

fn print_cli_help() {
    eprintln!(concat!(
        "Usage: rv-agent <command> [options]\n\n",
        "Commands:\n",
        "  inspect <FILE.dat> [--json]   Decode a persisted table file\n",
        "  rules <FILE>                  Validate a force_branches file\n",
        "  probe                         Run target-process detection and print the verdict\n",
        "  watch                         Attach to this process and reload rules on signal\n",
        "  reload --pid <PID>            Send the reload signal to a traced process\n\n",
        "Options:\n",
        "  --pid <PID>          Process to probe or signal (default: current process)\n",
        "  --data-root <DIR>    Package data root (default: /data/data, env RV_DATA_ROOT)\n",
        "  --package <NAME>     Treat the process as a target of this package (env RV_PACKAGE)\n",
        "  --signal <N>         Reload signal number (default: 44, env RV_RELOAD_SIGNAL)\n",
        "  --json               JSON output for inspect\n",
        "  -V, --version        Show version\n",
        "  -h, --help           Show this help\n"
    ));
}

fn binary_version_text() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        let cli = parse_cli_args(&[]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Help);
    }

    #[test]
    fn inspect_takes_a_file_and_json_flag() {
        let cli = parse_cli_args(&args(&["inspect", "1_000001_7_code.dat", "--json"]))
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Inspect(PathBuf::from("1_000001_7_code.dat"))
        );
        assert!(cli.json);
    }

    #[test]
    fn overrides_are_collected_for_any_command() {
        let cli = parse_cli_args(&args(&[
            "--data-root",
            "/tmp/data",
            "probe",
            "--pid",
            "321",
            "--package",
            "com.example.app",
            "--signal",
            "45",
        ]))
        .expect("parse should succeed");
        assert_eq!(cli.command, Command::Probe);

        let mut config = AgentConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.data_root, PathBuf::from("/tmp/data"));
        assert_eq!(config.pid, Some(321));
        assert_eq!(config.package.as_deref(), Some("com.example.app"));
        assert_eq!(config.reload_signal, 45);
    }

    #[test]
    fn reload_requires_a_pid() {
        let err = parse_cli_args(&args(&["reload"])).expect_err("parse should fail");
        assert!(err.contains("--pid"));
        let cli = parse_cli_args(&args(&["reload", "--pid", "9"])).expect("parse should succeed");
        assert_eq!(cli.command, Command::Reload);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        assert!(parse_cli_args(&args(&["inspect"])).is_err());
        assert!(parse_cli_args(&args(&["probe", "--json"])).is_err());
        assert!(parse_cli_args(&args(&["probe", "--pid", "abc"])).is_err());
        assert!(parse_cli_args(&args(&["probe", "--signal", "0"])).is_err());
        assert!(parse_cli_args(&args(&["probe", "--bogus"])).is_err());
        assert!(parse_cli_args(&args(&["dance"])).is_err());
        assert!(parse_cli_args(&args(&["watch", "extra"])).is_err());
        assert!(parse_cli_args(&args(&["--package", ""])).is_err());
    }

    #[test]
    fn version_flag_short_circuits() {
        let cli = parse_cli_args(&args(&["inspect", "-V"])).expect("parse should succeed");
        assert_eq!(cli.command, Command::Version);
    }
}
