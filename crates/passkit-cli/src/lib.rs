//! # passkit-cli
//!
//! Command-line entry point for a suite of passkit analyzers.
//!
//! A binary embedding a suite calls [`run`] from `main`:
//!
//! ```ignore
//! fn main() {
//!     let analyzers = vec![rename::analyzer(), shadow::analyzer()];
//!     std::process::exit(passkit_cli::run(std::env::args(), &analyzers));
//! }
//! ```
//!
//! Usage:
//! ```bash
//! mysuite [-fix] [-diff] [-json] [-flags] [-<analyzer>[=false]] [-<analyzer>.<flag>=VALUE] PATTERN...
//! ```
//!
//! Exit codes are [`exit::SUCCESS`], [`exit::FAILURE`] and
//! [`exit::DIAGNOSTICS`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Result;
use passkit_core::{Analyzer, Loader, ManifestLoader};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod args;
mod commands;
mod config_resolver;

/// Process exit codes.
pub mod exit {
    /// No diagnostics, or fixes applied cleanly.
    pub const SUCCESS: i32 = 0;
    /// The analysis could not run: load, planning, analyzer or fix failure.
    pub const FAILURE: i32 = 1;
    /// Diagnostics were reported and no fixes were requested.
    pub const DIAGNOSTICS: i32 = 3;
}

/// Runs `analyzers` as a command-line tool and returns the exit code.
///
/// Packages are loaded by a [`ManifestLoader`] found at or above `--dir`
/// (default: the current directory). Output goes to stdout and stderr.
pub fn run<I, S>(argv: I, analyzers: &[Arc<Analyzer>]) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = std::io::stdout().lock();
    let mut err = std::io::stderr().lock();
    main_with(argv, analyzers, None, &mut out, &mut err)
}

/// Like [`run`], with a caller-provided loader and output streams.
pub fn run_with_loader<I, S>(
    argv: I,
    analyzers: &[Arc<Analyzer>],
    loader: &dyn Loader,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    main_with(argv, analyzers, Some(loader), out, err)
}

fn main_with<I, S>(
    argv: I,
    analyzers: &[Arc<Analyzer>],
    loader: Option<&dyn Loader>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv = args::normalize(argv.into_iter().map(Into::into));
    let name = argv
        .first()
        .and_then(|a| std::path::Path::new(a).file_name())
        .map_or_else(|| "passkit".to_string(), |n| n.to_string_lossy().into_owned());

    let matches = match args::command(&name, analyzers).try_get_matches_from(&argv) {
        Ok(matches) => matches,
        Err(e) => {
            let rendered = e.render().to_string();
            let stream: &mut dyn Write = if e.use_stderr() { err } else { out };
            let _ = write!(stream, "{rendered}");
            return e.exit_code();
        }
    };
    let args = args::from_matches(&matches, analyzers);
    init_logging(args.verbose);

    match execute(&args, &name, analyzers, loader, out, err) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!("{e:?}");
            let _ = writeln!(err, "{name}: {e:#}");
            exit::FAILURE
        }
    }
}

fn execute(
    args: &args::Args,
    name: &str,
    analyzers: &[Arc<Analyzer>],
    loader: Option<&dyn Loader>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<i32> {
    if args.print_flags {
        commands::output::print_flags(&args::flag_defs(analyzers), out)?;
        return Ok(exit::SUCCESS);
    }
    if args.patterns.is_empty() {
        writeln!(err, "usage: {name} [-flag] [package pattern ...]")?;
        writeln!(err, "run '{name} --help' for the list of flags")?;
        return Ok(exit::FAILURE);
    }

    let (options, config) = commands::check::options(args)?;
    let discovered;
    let loader = match loader {
        Some(loader) => loader,
        None => {
            discovered = ManifestLoader::discover(&args.dir)?
                .with_cancel(options.cancel_token().clone());
            &discovered as &dyn Loader
        }
    };

    let env = commands::check::Env {
        loader,
        options,
        out,
        err,
    };
    commands::check::run(args, &config, analyzers, env)
}

/// Installs the stderr subscriber. `RUST_LOG` overrides the default level
/// unless `--verbose` is given. A subscriber installed earlier is kept.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
