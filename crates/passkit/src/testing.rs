//! Expectation-driven tests for analyzers.
//!
//! Test data is an ordinary workspace (a directory with a
//! `passkit-workspace.toml`). Source files state what the analyzer under
//! test must report with `// want` comments:
//!
//! ```text
//! fn f() { g(); } // want "call of .*g may panic"
//! fn g() {}       // want g:"Panics"
//! ```
//!
//! - `"re"` expects a diagnostic on that line whose message matches `re`.
//! - `name:"re"` expects a fact on the object `name` declared on that line,
//!   or a package fact when `name` is the package name and the comment is on
//!   the first line. The fact's `Debug` rendering must match `re`.
//!
//! Inside the quotes, `\"` stands for a quote; every other backslash is
//! passed to the regex unchanged. Several expectations may share a comment.
//!
//! ```ignore
//! #[test]
//! fn finds_panicking_calls() {
//!     passkit::testing::run("tests/testdata", &panics::analyzer(), &["a", "b"]);
//! }
//! ```

use anyhow::{bail, Context, Result};
use passkit_core::{
    analyze, validate, Analysis, Analyzer, FixPlan, LoadMode, Loader, ManifestLoader, Options,
    Package,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MARKER: &str = "// want ";

#[derive(Debug)]
enum Want {
    Diagnostic(Regex),
    Fact { name: String, pattern: Regex },
}

impl fmt::Display for Want {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diagnostic(re) => write!(f, "diagnostic matching {:?}", re.as_str()),
            Self::Fact { name, pattern } => {
                write!(f, "fact {name}:{:?}", pattern.as_str())
            }
        }
    }
}

/// Expectations keyed by file and line.
type Wants = BTreeMap<(PathBuf, usize), Vec<Want>>;

/// A disagreement between the analyzer and the test data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// A package failed to load.
    Load(String),
    /// An action of the analyzer under test failed.
    Failed(String),
    /// A diagnostic no expectation asked for.
    UnexpectedDiagnostic {
        /// `file:line:col`.
        posn: String,
        /// The message.
        message: String,
    },
    /// A fact no expectation asked for.
    UnexpectedFact {
        /// `file:line:col` of the object, or the package path.
        posn: String,
        /// Object or package name.
        name: String,
        /// `Debug` rendering of the fact.
        fact: String,
    },
    /// An expectation nothing matched.
    Unmatched {
        /// File of the comment.
        file: PathBuf,
        /// Line of the comment.
        line: usize,
        /// Rendered expectation.
        want: String,
    },
    /// A fixed file differs from its golden file.
    Golden {
        /// The golden file.
        file: PathBuf,
        /// Unified diff from golden to actual.
        diff: String,
    },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(error) => write!(f, "load error: {error}"),
            Self::Failed(error) => write!(f, "analysis failed: {error}"),
            Self::UnexpectedDiagnostic { posn, message } => {
                write!(f, "{posn}: unexpected diagnostic: {message}")
            }
            Self::UnexpectedFact { posn, name, fact } => {
                write!(f, "{posn}: unexpected fact {name}: {fact}")
            }
            Self::Unmatched { file, line, want } => {
                write!(f, "{}:{line}: no {want}", file.display())
            }
            Self::Golden { file, diff } => {
                write!(f, "{} does not match the fixed file:\n{diff}", file.display())
            }
        }
    }
}

/// The result of running one analyzer over test data.
#[derive(Debug)]
pub struct Outcome {
    /// The analysis.
    pub analysis: Analysis,
    /// Everything that disagreed with the `// want` comments.
    pub problems: Vec<Problem>,
}

impl Outcome {
    /// One problem per line.
    #[must_use]
    pub fn report(&self) -> String {
        self.problems
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs `analyzer` on the packages of `dir` matching `patterns` and
/// checks the result against the `// want` comments of the root packages.
///
/// # Errors
///
/// Returns an error if the test data cannot be loaded or a `// want`
/// comment is malformed. Disagreements are not errors; they are listed in
/// [`Outcome::problems`].
pub fn check(dir: impl AsRef<Path>, analyzer: &Arc<Analyzer>, patterns: &[&str]) -> Result<Outcome> {
    let dir = dir.as_ref();
    let analyzers = [Arc::clone(analyzer)];
    let mode = if validate(&analyzers)?.iter().any(|a| a.uses_facts()) {
        LoadMode::AllSyntax
    } else {
        LoadMode::Roots
    };
    let patterns: Vec<String> = patterns.iter().map(ToString::to_string).collect();
    let packages = ManifestLoader::new(dir)
        .load(&patterns, mode)
        .with_context(|| format!("failed to load {}", dir.display()))?;
    if packages.is_empty() {
        bail!("no packages matched {} in {}", patterns.join(" "), dir.display());
    }

    let mut wants = Wants::new();
    let mut problems = Vec::new();
    for pkg in &packages {
        problems.extend(pkg.errors.iter().map(|e| Problem::Load(e.to_string())));
        for file in &pkg.files {
            parse_wants(file.path(), file.content(), &mut wants)?;
        }
    }

    let analysis = analyze(&analyzers, &packages, &Options::new())?;
    for action in analysis.roots().filter(|a| a.analyzer().name() == analyzer.name()) {
        if let Some(error) = action.error() {
            problems.push(Problem::Failed(format!("{action}: {error}")));
        }
        let pkg = action.package();
        for diag in action.diagnostics() {
            let Some(posn) = pkg.fset.position(diag.pos) else {
                continue;
            };
            let key = (posn.filename.clone(), posn.line);
            let matched = take(&mut wants, &key, |want| {
                matches!(want, Want::Diagnostic(re) if re.is_match(&diag.message))
            });
            if !matched {
                problems.push(Problem::UnexpectedDiagnostic {
                    posn: posn.to_string(),
                    message: diag.message.clone(),
                });
            }
        }
        check_facts(action, pkg, &mut wants, &mut problems)?;
    }

    for ((file, line), pending) in wants {
        for want in pending {
            problems.push(Problem::Unmatched {
                file: file.clone(),
                line,
                want: want.to_string(),
            });
        }
    }
    Ok(Outcome { analysis, problems })
}

fn check_facts(
    action: &passkit_core::Action,
    pkg: &Package,
    wants: &mut Wants,
    problems: &mut Vec<Problem>,
) -> Result<()> {
    let store = action.facts()?;
    for fact in store.object_facts() {
        if fact.object.package != pkg.path {
            continue;
        }
        let rendered = format!("{:?}", fact.fact);
        let posn = pkg
            .types
            .lookup(fact.object)
            .and_then(|o| pkg.fset.position(o.pos));
        let matched = posn.as_ref().is_some_and(|posn| {
            let key = (posn.filename.clone(), posn.line);
            take(wants, &key, |want| {
                matches!(want, Want::Fact { name, pattern }
                    if *name == fact.object.name && pattern.is_match(&rendered))
            })
        });
        if !matched {
            problems.push(Problem::UnexpectedFact {
                posn: posn.map_or_else(|| pkg.path.clone(), |p| p.to_string()),
                name: fact.object.qualified_name(),
                fact: rendered,
            });
        }
    }
    for fact in store.package_facts() {
        if fact.package != pkg.path {
            continue;
        }
        let rendered = format!("{:?}", fact.fact);
        let matched = pkg.files.iter().any(|file| {
            take(wants, &(file.path().to_path_buf(), 1), |want| {
                matches!(want, Want::Fact { name, pattern }
                    if *name == pkg.name && pattern.is_match(&rendered))
            })
        });
        if !matched {
            problems.push(Problem::UnexpectedFact {
                posn: pkg.path.clone(),
                name: pkg.name.clone(),
                fact: rendered,
            });
        }
    }
    Ok(())
}

/// Removes the first expectation at `key` accepted by `accept`.
fn take(wants: &mut Wants, key: &(PathBuf, usize), accept: impl Fn(&Want) -> bool) -> bool {
    let Some(pending) = wants.get_mut(key) else {
        return false;
    };
    let Some(i) = pending.iter().position(accept) else {
        return false;
    };
    pending.remove(i);
    if pending.is_empty() {
        wants.remove(key);
    }
    true
}

fn parse_wants(path: &Path, content: &str, wants: &mut Wants) -> Result<()> {
    for (i, line) in content.lines().enumerate() {
        let Some(at) = line.find(MARKER) else {
            continue;
        };
        let parsed = parse_want_list(&line[at + MARKER.len()..])
            .with_context(|| format!("{}:{}: malformed want comment", path.display(), i + 1))?;
        wants
            .entry((path.to_path_buf(), i + 1))
            .or_default()
            .extend(parsed);
    }
    Ok(())
}

fn parse_want_list(mut rest: &str) -> Result<Vec<Want>> {
    let mut out = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(out);
        }
        let (name, quoted) = match rest.find('"') {
            Some(0) => (None, rest),
            Some(q) if rest[..q].ends_with(':') => (Some(rest[..q - 1].to_string()), &rest[q..]),
            _ => bail!("expected \"regexp\" or name:\"regexp\", found {rest:?}"),
        };
        let (pattern, after) = unquote(quoted)?;
        let pattern = Regex::new(&pattern).with_context(|| format!("invalid regexp {pattern:?}"))?;
        out.push(match name {
            Some(name) => Want::Fact { name, pattern },
            None => Want::Diagnostic(pattern),
        });
        rest = after;
    }
}

/// Splits a leading `"..."` off `s`, returning its text and the remainder.
fn unquote(s: &str) -> Result<(String, &str)> {
    let mut text = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((text, &s[i + 1..])),
            '\\' => match chars.next() {
                Some((_, '"')) => text.push('"'),
                Some((_, other)) => {
                    text.push('\\');
                    text.push(other);
                }
                None => break,
            },
            _ => text.push(c),
        }
    }
    bail!("unterminated string {s:?}")
}

/// Like [`check`], and panics with the report if anything disagrees.
///
/// # Panics
///
/// Panics if loading fails or the outcome has problems.
pub fn run(dir: impl AsRef<Path>, analyzer: &Arc<Analyzer>, patterns: &[&str]) -> Analysis {
    let outcome = check(dir, analyzer, patterns).unwrap_or_else(|e| panic!("{e:#}"));
    if !outcome.problems.is_empty() {
        panic!("{}: {} problem(s)\n{}", analyzer.name(), outcome.problems.len(), outcome.report());
    }
    outcome.analysis
}

/// Like [`check`], and also applies the suggested fixes in memory and
/// compares every fixed file with `<file>.golden` next to it.
///
/// # Errors
///
/// See [`check`].
pub fn check_with_suggested_fixes(
    dir: impl AsRef<Path>,
    analyzer: &Arc<Analyzer>,
    patterns: &[&str],
) -> Result<Outcome> {
    let mut outcome = check(dir, analyzer, patterns)?;
    let plan = FixPlan::from_analysis(&outcome.analysis);
    for conflict in &plan.conflicts {
        outcome.problems.push(Problem::Failed(conflict.to_string()));
    }
    for file in &plan.files {
        let original = std::fs::read_to_string(&file.path)
            .with_context(|| format!("failed to read {}", file.path.display()))?;
        let fixed = file.apply_to(&original)?;
        let mut golden_path = file.path.clone().into_os_string();
        golden_path.push(".golden");
        let golden_path = PathBuf::from(golden_path);
        let golden = std::fs::read_to_string(&golden_path)
            .with_context(|| format!("failed to read {}", golden_path.display()))?;
        if golden != fixed {
            outcome.problems.push(Problem::Golden {
                diff: passkit_core::unified_diff(&golden_path, &golden, &fixed),
                file: golden_path,
            });
        }
    }
    Ok(outcome)
}

/// Like [`check_with_suggested_fixes`], and panics with the report if
/// anything disagrees.
///
/// # Panics
///
/// Panics if loading fails or the outcome has problems.
pub fn run_with_suggested_fixes(
    dir: impl AsRef<Path>,
    analyzer: &Arc<Analyzer>,
    patterns: &[&str],
) -> Analysis {
    let outcome =
        check_with_suggested_fixes(dir, analyzer, patterns).unwrap_or_else(|e| panic!("{e:#}"));
    if !outcome.problems.is_empty() {
        panic!("{}: {} problem(s)\n{}", analyzer.name(), outcome.problems.len(), outcome.report());
    }
    outcome.analysis
}
