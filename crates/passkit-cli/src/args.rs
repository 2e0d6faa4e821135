//! Command-line flags.
//!
//! Driver flags are fixed; every analyzer adds an enable flag `--<name>`
//! and one `--<name>.<flag>` per declared [`FlagSpec`](passkit_core::FlagSpec).
//! The parser is built at runtime with the clap builder API because the
//! flag set depends on the analyzers.

use clap::builder::BoolishValueParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use passkit_core::Analyzer;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A registered long flag, as listed by `--flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FlagDef {
    pub(crate) name: String,
    pub(crate) is_bool: bool,
    pub(crate) usage: String,
}

/// Parsed command line.
#[derive(Debug, Default)]
pub(crate) struct Args {
    pub(crate) patterns: Vec<String>,
    pub(crate) fix: bool,
    pub(crate) diff: bool,
    pub(crate) json: bool,
    pub(crate) print_flags: bool,
    pub(crate) verbose: bool,
    pub(crate) dir: PathBuf,
    pub(crate) config: Option<PathBuf>,
    pub(crate) parallelism: Option<usize>,
    /// Explicit `--<analyzer>` settings.
    pub(crate) enabled: BTreeMap<String, bool>,
    /// Explicit `--<analyzer>.<flag>` values.
    pub(crate) analyzer_flags: BTreeMap<String, BTreeMap<String, String>>,
}

/// Ids used by the fixed arguments; analyzer flags with these names are
/// not registered.
const RESERVED: &[&str] = &["patterns", "verbose", "dir", "config", "parallelism", "help"];

const DRIVER_FLAGS: &[(&str, &str)] = &[
    ("fix", "apply all suggested fixes"),
    ("diff", "with -fix, don't update the files, but print a unified diff"),
    ("json", "emit JSON output"),
    ("flags", "print analyzer flags in JSON"),
];

/// Rewrites single-dash long flags (`-fix`, `-rename.x=1`) to
/// their double-dash form. Single-letter flags and anything after `--` are
/// left alone.
pub(crate) fn normalize(argv: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut passthrough = false;
    for (i, arg) in argv.into_iter().enumerate() {
        if i == 0 || passthrough {
            out.push(arg);
            continue;
        }
        if arg == "--" {
            passthrough = true;
            out.push(arg);
            continue;
        }
        let name = arg
            .strip_prefix('-')
            .filter(|rest| !rest.starts_with('-'))
            .map(|rest| rest.split('=').next().unwrap_or(rest));
        match name {
            Some(name) if name.chars().count() > 1 => out.push(format!("-{arg}")),
            _ => out.push(arg),
        }
    }
    out
}

/// Lists every long flag: driver flags, then each analyzer's enable flag
/// and its own flags, sorted by name.
pub(crate) fn flag_defs(analyzers: &[Arc<Analyzer>]) -> Vec<FlagDef> {
    let mut defs: Vec<FlagDef> = DRIVER_FLAGS
        .iter()
        .map(|(name, usage)| FlagDef {
            name: (*name).to_string(),
            is_bool: true,
            usage: (*usage).to_string(),
        })
        .collect();
    for analyzer in analyzers {
        defs.push(FlagDef {
            name: analyzer.name().to_string(),
            is_bool: true,
            usage: format!("enable {} analysis", analyzer.name()),
        });
        for flag in analyzer.flags() {
            defs.push(FlagDef {
                name: format!("{}.{}", analyzer.name(), flag.name),
                is_bool: flag.is_bool,
                usage: flag.usage.clone(),
            });
        }
    }
    defs.sort_by(|a, b| a.name.cmp(&b.name));
    defs.dedup_by(|a, b| a.name == b.name);
    defs
}

fn bool_arg(name: String, usage: String) -> Arg {
    Arg::new(name.clone())
        .long(name)
        .help(usage)
        .num_args(0..=1)
        .require_equals(true)
        .default_missing_value("true")
        .value_parser(BoolishValueParser::new())
}

/// Builds the parser for `analyzers` (the analyzers the user may select,
/// without their prerequisites).
pub(crate) fn command(name: &str, analyzers: &[Arc<Analyzer>]) -> Command {
    let mut cmd = Command::new(name.to_string())
        .about("Runs analyzers over packages and reports their diagnostics")
        .override_usage(format!("{name} [-flag] [package pattern ...]"))
        .arg(
            Arg::new("patterns")
                .value_name("PATTERN")
                .help("package patterns: import paths, prefix/..., ..., or file=PATH")
                .num_args(0..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dir")
                .short('C')
                .long("dir")
                .value_name("DIR")
                .help("directory to search for the workspace manifest and config")
                .default_value(".")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("path to configuration file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("parallelism")
                .long("parallelism")
                .value_name("N")
                .help("maximum number of actions running at once")
                .value_parser(clap::value_parser!(usize)),
        );

    for def in flag_defs(analyzers) {
        if RESERVED.contains(&def.name.as_str()) {
            tracing::warn!("flag --{} clashes with a driver flag; ignoring it", def.name);
            continue;
        }
        cmd = cmd.arg(if def.is_bool {
            bool_arg(def.name, def.usage)
        } else {
            Arg::new(def.name.clone())
                .long(def.name)
                .help(def.usage)
                .value_name("VALUE")
                .num_args(1)
        });
    }
    cmd
}

/// Extracts [`Args`] from parsed matches.
pub(crate) fn from_matches(matches: &ArgMatches, analyzers: &[Arc<Analyzer>]) -> Args {
    let flag = |id: &str| matches.get_one::<bool>(id).copied().unwrap_or(false);
    let mut args = Args {
        patterns: matches
            .get_many::<String>("patterns")
            .map(|v| v.cloned().collect())
            .unwrap_or_default(),
        fix: flag("fix"),
        diff: flag("diff"),
        json: flag("json"),
        print_flags: flag("flags"),
        verbose: matches.get_flag("verbose"),
        dir: matches
            .get_one::<PathBuf>("dir")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(".")),
        config: matches.get_one::<PathBuf>("config").cloned(),
        parallelism: matches.get_one::<usize>("parallelism").copied(),
        ..Args::default()
    };

    for analyzer in analyzers {
        let name = analyzer.name();
        if let Ok(Some(&on)) = matches.try_get_one::<bool>(name) {
            args.enabled.insert(name.to_string(), on);
        }
        for spec in analyzer.flags() {
            let id = format!("{name}.{}", spec.name);
            let value = if spec.is_bool {
                matches
                    .try_get_one::<bool>(&id)
                    .ok()
                    .flatten()
                    .map(ToString::to_string)
            } else {
                matches.try_get_one::<String>(&id).ok().flatten().cloned()
            };
            if let Some(value) = value {
                args.analyzer_flags
                    .entry(name.to_string())
                    .or_default()
                    .insert(spec.name.clone(), value);
            }
        }
    }
    args
}

/// Returns the analyzers to run.
///
/// If any analyzer is explicitly enabled, only the enabled ones run;
/// otherwise every analyzer not explicitly disabled runs. `configured`
/// supplies settings the command line did not.
pub(crate) fn select(
    analyzers: &[Arc<Analyzer>],
    explicit: &BTreeMap<String, bool>,
    configured: impl Fn(&str) -> Option<bool>,
) -> Vec<Arc<Analyzer>> {
    let setting = |a: &Analyzer| {
        explicit
            .get(a.name())
            .copied()
            .or_else(|| configured(a.name()))
    };
    let any_enabled = analyzers.iter().any(|a| setting(a) == Some(true));
    analyzers
        .iter()
        .filter(|a| match setting(a) {
            Some(on) => on,
            None => !any_enabled,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use passkit_core::FlagSpec;

    fn analyzers() -> Vec<Arc<Analyzer>> {
        let rename = Analyzer::builder("rename")
            .doc("renames things")
            .flag(FlagSpec::string("to", "baz", "new name"))
            .flag(FlagSpec::bool("all", false, "rename everywhere"))
            .run(|_| Ok(None))
            .build()
            .unwrap();
        let other = Analyzer::builder("other")
            .doc("other things")
            .run(|_| Ok(None))
            .build()
            .unwrap();
        vec![rename, other]
    }

    fn parse(argv: &[&str]) -> Args {
        let analyzers = analyzers();
        let argv = normalize(argv.iter().map(ToString::to_string));
        let matches = command("passkit", &analyzers)
            .try_get_matches_from(argv)
            .unwrap();
        from_matches(&matches, &analyzers)
    }

    #[test]
    fn single_dash_long_flags_are_normalized() {
        let argv = ["prog", "-fix", "-v", "-rename.to=x", "--json", "-", "--", "-diff"];
        assert_eq!(
            normalize(argv.iter().map(ToString::to_string)),
            ["prog", "--fix", "-v", "--rename.to=x", "--json", "-", "--", "-diff"]
        );
    }

    #[test]
    fn parses_driver_and_analyzer_flags() {
        let args = parse(&[
            "passkit",
            "-fix",
            "-rename.to",
            "qux",
            "-rename.all",
            "-other=false",
            "a/...",
        ]);
        assert!(args.fix);
        assert!(!args.diff);
        assert_eq!(args.patterns, ["a/..."]);
        assert_eq!(args.enabled.get("other"), Some(&false));
        let rename = &args.analyzer_flags["rename"];
        assert_eq!(rename["to"], "qux");
        assert_eq!(rename["all"], "true");
    }

    #[test]
    fn bare_bool_flag_does_not_eat_patterns() {
        let args = parse(&["passkit", "-fix", "rename"]);
        assert!(args.fix);
        assert_eq!(args.patterns, ["rename"]);
    }

    #[test]
    fn enabling_one_analyzer_disables_the_rest() {
        let all = analyzers();
        let names = |selected: Vec<Arc<Analyzer>>| -> Vec<String> {
            selected.iter().map(|a| a.name().to_string()).collect()
        };

        let none = BTreeMap::new();
        assert_eq!(names(select(&all, &none, |_| None)), ["rename", "other"]);

        let only = BTreeMap::from([("other".to_string(), true)]);
        assert_eq!(names(select(&all, &only, |_| None)), ["other"]);

        let without = BTreeMap::from([("other".to_string(), false)]);
        assert_eq!(names(select(&all, &without, |_| None)), ["rename"]);

        // The command line wins over the config file.
        let configured = |n: &str| (n == "rename").then_some(false);
        assert_eq!(names(select(&all, &only, configured)), ["other"]);
        assert_eq!(names(select(&all, &none, configured)), ["other"]);
    }

    #[test]
    fn flag_defs_are_sorted_and_typed() {
        let defs = flag_defs(&analyzers());
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            ["diff", "fix", "flags", "json", "other", "rename", "rename.all", "rename.to"]
        );
        assert!(!defs.iter().find(|d| d.name == "rename.to").unwrap().is_bool);
    }
}
