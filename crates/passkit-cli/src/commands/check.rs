//! The analysis command: load, analyze, report, optionally fix.

use super::output;
use crate::args::{self, Args};
use crate::config_resolver;
use crate::exit;
use anyhow::{Context, Result};
use passkit_core::{
    analyze, validate, Analyzer, DriverError, FixMode, FixPlan, LoadMode, Loader, Options,
};
use std::io::Write;
use std::sync::Arc;

/// Everything a check run needs besides the analyzers.
pub(crate) struct Env<'a> {
    pub(crate) loader: &'a dyn Loader,
    pub(crate) options: Options,
    pub(crate) out: &'a mut dyn Write,
    pub(crate) err: &'a mut dyn Write,
}

/// Builds analysis options from the config file and the command line.
pub(crate) fn options(args: &Args) -> Result<(Options, passkit_core::Config)> {
    let source = config_resolver::resolve(&args.dir, args.config.as_deref());
    let config = source.load()?;

    let mut options = Options::from_config(&config);
    if let Some(n) = args.parallelism {
        options = options.with_parallelism(n);
    }
    for (analyzer, flags) in &args.analyzer_flags {
        for (flag, value) in flags {
            options = options.with_flag(analyzer, flag, value);
        }
    }
    Ok((options, config))
}

/// Runs the analyzers selected by `args` and returns the exit code.
pub(crate) fn run(
    args: &Args,
    config: &passkit_core::Config,
    analyzers: &[Arc<Analyzer>],
    env: Env<'_>,
) -> Result<i32> {
    let Env {
        loader,
        options,
        out,
        err,
    } = env;

    let selected = args::select(analyzers, &args.enabled, |name| {
        config.analyzer_enabled(name)
    });
    let closure = validate(&selected).context("invalid analyzer set")?;
    let mode = if closure.iter().any(|a| a.uses_facts()) {
        LoadMode::AllSyntax
    } else {
        LoadMode::Roots
    };

    let packages = loader
        .load(&args.patterns, mode)
        .context("failed to load packages")?;
    if packages.is_empty() {
        writeln!(err, "no packages matched {}", args.patterns.join(" "))?;
        return Ok(exit::FAILURE);
    }
    let load_failed = packages.iter().any(|p| p.has_errors());
    if load_failed {
        output::print_load_errors(&packages, err)?;
    }

    tracing::info!(
        analyzers = selected.len(),
        packages = packages.len(),
        ?mode,
        "starting analysis"
    );
    let analysis = match analyze(&selected, &packages, &options) {
        Ok(analysis) => analysis,
        Err(fatal) => {
            report_fatal(&fatal, err)?;
            return Ok(exit::FAILURE);
        }
    };

    let json = args.json || config.driver.json;
    if json {
        output::print_json(&analysis, out)?;
    } else {
        output::print_text(&analysis, out)?;
    }
    let failures = analysis.failures();
    output::print_failures(&failures, err)?;

    let mut fix_failed = false;
    let fixing = args.fix || args.diff;
    if fixing {
        let mode = if args.diff { FixMode::Diff } else { FixMode::Write };
        let report = FixPlan::from_analysis(&analysis).apply(mode);
        out.write_all(report.diff.as_bytes())?;
        for error in &report.errors {
            writeln!(err, "{error}")?;
        }
        fix_failed = report.has_errors();
        tracing::info!(files = report.changed.len(), "fixes applied");
    }

    let code = if load_failed || !failures.is_empty() || fix_failed {
        exit::FAILURE
    } else if !fixing && !json && !analysis.diagnostics().is_empty() {
        exit::DIAGNOSTICS
    } else {
        exit::SUCCESS
    };
    Ok(code)
}

fn report_fatal(fatal: &DriverError, err: &mut dyn Write) -> std::io::Result<()> {
    tracing::error!("analysis failed: {fatal}");
    writeln!(err, "{fatal}")
}
