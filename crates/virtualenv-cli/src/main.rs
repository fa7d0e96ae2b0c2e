use std::ffi::OsString;
use std::path::PathBuf;

use atty::Stream;
use clap::{value_parser, Parser};
use color_eyre::Result;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use virtualenv_core::{
    create_environment, CommandStatus, ConfigSources, EnvSnapshot, ExecutionOutcome, PeriodicUpdateArgs,
    PERIODIC_UPDATE_COMMAND,
};

mod cli;
mod style;

use cli::VirtualenvCli;
use style::Style;

const LOG_ENV: &str = "VIRTUALENV_LOG";

/// Hidden entry point of the detached wheel refresh child.
#[derive(Parser, Debug)]
#[command(name = PERIODIC_UPDATE_COMMAND, hide = true)]
struct PeriodicCli {
    distribution: String,
    for_py_version: String,
    /// Empty when no wheel was seeded before.
    wheel: String,
    #[arg(value_parser = value_parser!(PathBuf))]
    app_data: PathBuf,
    #[arg(long, value_parser = value_parser!(PathBuf))]
    interpreter: PathBuf,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let env = EnvSnapshot::capture();

    let mut args: Vec<OsString> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == PERIODIC_UPDATE_COMMAND) {
        args.remove(0);
        std::process::exit(periodic_update(args, &env));
    }

    // Verbosity is needed before the sources are read, so that config
    // conversion warnings are filtered the same way as everything else.
    let (verbose, quiet) = count_verbosity(&args);
    init_tracing(verbose, quiet, &env);

    let sources = ConfigSources::load(env.clone());
    let cli = match VirtualenvCli::parse_with(&sources) {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };

    let outcome = match cli
        .session_options()
        .and_then(|options| create_environment(options, &env))
    {
        Ok(outcome) => outcome,
        Err(err) => ExecutionOutcome::from_error(&err, cli.with_traceback),
    };
    let code = emit_output(&cli, &outcome);
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn periodic_update(args: Vec<OsString>, env: &EnvSnapshot) -> i32 {
    let parsed = match PeriodicCli::try_parse_from(args) {
        Ok(parsed) => parsed,
        Err(err) => err.exit(),
    };
    let update = PeriodicUpdateArgs {
        distribution: parsed.distribution,
        for_py_version: parsed.for_py_version,
        wheel: Some(parsed.wheel).filter(|wheel| !wheel.is_empty()).map(PathBuf::from),
        app_data: parsed.app_data,
        interpreter: parsed.interpreter,
    };
    match update.run(env) {
        Ok(()) => 0,
        Err(_) => CommandStatus::Failure.exit_code(),
    }
}

fn count_verbosity(args: &[OsString]) -> (u8, u8) {
    let mut verbose = 0u8;
    let mut quiet = 0u8;
    for arg in args.iter().skip(1).filter_map(|arg| arg.to_str()) {
        match arg {
            "--verbose" => verbose = verbose.saturating_add(1),
            "--quiet" => quiet = quiet.saturating_add(1),
            short if short.starts_with('-') && !short.starts_with("--") => {
                let flags = &short[1..];
                if flags.chars().all(|c| c == 'v' || c == 'q') {
                    for c in flags.chars() {
                        if c == 'v' {
                            verbose = verbose.saturating_add(1);
                        } else {
                            quiet = quiet.saturating_add(1);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    (verbose, quiet)
}

/// Base level `warn`; each `-v` raises it one step and each `-q` lowers it.
fn level_for(verbose: u8, quiet: u8) -> &'static str {
    const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];
    let index = (2 + i16::from(verbose) - i16::from(quiet)).clamp(0, 5);
    LEVELS[usize::try_from(index).unwrap_or(2)]
}

fn init_tracing(verbose: u8, quiet: u8, env: &EnvSnapshot) {
    let level = level_for(verbose, quiet);
    let filter = env
        .var(LOG_ENV)
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| {
            EnvFilter::new(format!(
                "virtualenv={level},virtualenv_cli={level},virtualenv_core={level},virtualenv_domain={level}"
            ))
        });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(cli: &VirtualenvCli, outcome: &ExecutionOutcome) -> i32 {
    let code = outcome.exit_code();
    if outcome.status == CommandStatus::Ok {
        if cli.quiet == 0 {
            let style = Style::new(atty::is(Stream::Stdout));
            println!("{}", style.status(outcome.status, &outcome.message));
            for line in detail_lines(&outcome.details) {
                println!("{}", style.detail(line));
            }
        }
        return code;
    }

    let style = Style::new(atty::is(Stream::Stderr));
    if let Some((stdout, stderr)) = child_output(&outcome.details) {
        if !stdout.trim().is_empty() {
            eprintln!("{}", style.child_output("stdout", stdout.trim_end()));
        }
        if !stderr.trim().is_empty() {
            eprintln!("{}", style.child_output("stderr", stderr.trim_end()));
        }
    }
    eprintln!("{}", style.status(outcome.status, &outcome.message));
    code
}

fn detail_lines(details: &Value) -> impl Iterator<Item = &str> {
    details
        .get("lines")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn child_output(details: &Value) -> Option<(&str, &str)> {
    let stdout = details.get("stdout")?.as_str()?;
    let stderr = details.get("stderr").and_then(Value::as_str).unwrap_or_default();
    Some((stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_steps_from_warn() {
        assert_eq!(level_for(0, 0), "warn");
        assert_eq!(level_for(1, 0), "info");
        assert_eq!(level_for(5, 0), "trace");
        assert_eq!(level_for(0, 1), "error");
        assert_eq!(level_for(0, 4), "off");
        assert_eq!(level_for(2, 1), "info");
    }

    #[test]
    fn counts_short_and_long_verbosity_flags() {
        let args: Vec<OsString> = ["virtualenv", "-vv", "--quiet", "-p", "python3", "venv"]
            .iter()
            .map(OsString::from)
            .collect();
        assert_eq!(count_verbosity(&args), (2, 1));
    }
}
