//! The `// want` harness against the workspace in `tests/testdata`.

use passkit::testing::{self, Problem};
use passkit::{Analyzer, Diagnostic, Fact, FactType, ObjectId, Pos, SuggestedFix, TextEdit};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use syn::spanned::Spanned;
use syn::visit::Visit;

fn testdata() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/testdata")
}

#[derive(Debug, Serialize, Deserialize)]
struct Panics;

impl Fact for Panics {
    const KIND: &'static str = "panics";
}

#[derive(Debug, Serialize, Deserialize)]
struct Checked(usize);

impl Fact for Checked {
    const KIND: &'static str = "checked";
}

/// Calls `pkg::name(..)` and `panic!` invocations of one function body.
#[derive(Default)]
struct Body {
    calls: Vec<(String, String, proc_macro2::Span)>,
    panics: bool,
}

impl<'ast> Visit<'ast> for Body {
    fn visit_expr_call(&mut self, call: &'ast syn::ExprCall) {
        if let syn::Expr::Path(path) = call.func.as_ref() {
            let segments: Vec<String> = path
                .path
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect();
            if let [pkg, name] = segments.as_slice() {
                self.calls.push((pkg.clone(), name.clone(), path.span()));
            }
        }
        syn::visit::visit_expr_call(self, call);
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        if mac.path.is_ident("panic") {
            self.panics = true;
        }
        syn::visit::visit_macro(self, mac);
    }
}

fn panics_analyzer() -> Arc<Analyzer> {
    Analyzer::builder("panics")
        .doc("finds functions that may panic")
        .fact_type(FactType::of::<Panics>())
        .fact_type(FactType::of::<Checked>())
        .run(|pass| {
            let path = pass.package().path.clone();
            let mut reports = Vec::new();
            let mut panicking = Vec::new();
            let mut checked = 0;
            for file in pass.files() {
                let ast = file.parse()?;
                for item in &ast.items {
                    let syn::Item::Fn(func) = item else { continue };
                    checked += 1;
                    let mut body = Body::default();
                    body.visit_block(&func.block);
                    let mut panics = body.panics;
                    for (pkg, name, span) in body.calls {
                        let id = ObjectId::new(pkg, name);
                        if pass.import_object_fact::<Panics>(&id).is_some() {
                            panics = true;
                            let pos = file.span_range(span).0;
                            reports.push((pos, format!("call of {id} may panic")));
                        }
                    }
                    if panics {
                        panicking.push(ObjectId::new(path.clone(), func.sig.ident.to_string()));
                    }
                }
            }
            for (pos, message) in reports {
                pass.report_at(pos, message);
            }
            for id in &panicking {
                pass.export_object_fact(id, Panics);
            }
            pass.export_package_fact(Checked(checked));
            Ok(None)
        })
        .build()
        .unwrap()
}

struct Idents<'a> {
    from: &'a str,
    found: Vec<proc_macro2::Span>,
}

impl<'ast> Visit<'ast> for Idents<'_> {
    fn visit_ident(&mut self, ident: &'ast proc_macro2::Ident) {
        if ident == self.from {
            self.found.push(ident.span());
        }
    }
}

fn rename_analyzer(to: &'static str) -> Arc<Analyzer> {
    Analyzer::builder("rename")
        .doc("renames bar")
        .run(move |pass| {
            let mut found: Vec<(Pos, Pos)> = Vec::new();
            for file in pass.files() {
                let ast = file.parse()?;
                let mut idents = Idents {
                    from: "bar",
                    found: Vec::new(),
                };
                idents.visit_file(&ast);
                found.extend(idents.found.into_iter().map(|span| file.span_range(span)));
            }
            for (pos, end) in found {
                pass.report(
                    Diagnostic::new(pos, format!("bar should be {to}"))
                        .with_end(end)
                        .with_fix(SuggestedFix::new(
                            format!("rename to {to}"),
                            vec![TextEdit::new(pos, end, to)],
                        )),
                );
            }
            Ok(None)
        })
        .build()
        .unwrap()
}

#[test]
fn facts_and_diagnostics_match_expectations() {
    let analysis = testing::run(testdata(), &panics_analyzer(), &["a", "b"]);
    assert_eq!(analysis.diagnostics().len(), 1);
}

#[test]
fn disagreements_are_listed() {
    let outcome = testing::check(testdata(), &panics_analyzer(), &["mismatch"]).unwrap();
    let file = testdata().join("mismatch").join("m.rs");

    assert!(outcome.problems.contains(&Problem::Unmatched {
        file,
        line: 1,
        want: "diagnostic matching \"never reported\"".to_string(),
    }));
    assert!(outcome.problems.iter().any(|p| matches!(
        p,
        Problem::UnexpectedFact { name, fact, .. } if name == "f" && fact == "Panics"
    )));
    assert!(outcome.problems.iter().any(|p| matches!(
        p,
        Problem::UnexpectedFact { name, fact, .. } if name == "mismatch" && fact == "Checked(1)"
    )));
    assert_eq!(outcome.problems.len(), 3, "{}", outcome.report());
}

#[test]
#[should_panic(expected = "panics: 3 problem(s)")]
fn run_panics_with_the_report() {
    testing::run(testdata(), &panics_analyzer(), &["mismatch"]);
}

#[test]
fn suggested_fixes_match_golden_files() {
    testing::run_with_suggested_fixes(testdata(), &rename_analyzer("baz"), &["rename"]);
}

#[test]
fn fixed_file_differing_from_golden_is_a_problem() {
    let outcome =
        testing::check_with_suggested_fixes(testdata(), &rename_analyzer("qux"), &["rename"])
            .unwrap();
    let golden = outcome
        .problems
        .iter()
        .find_map(|p| match p {
            Problem::Golden { file, diff } => Some((file, diff)),
            _ => None,
        })
        .unwrap();
    assert!(golden.0.ends_with("rename/lib.rs.golden"));
    assert!(golden.1.contains("+fn qux() {}"), "{}", golden.1);
}

#[test]
fn unknown_patterns_are_errors() {
    let err = testing::check(testdata(), &panics_analyzer(), &["nowhere/..."]).unwrap_err();
    assert!(err.to_string().starts_with("no packages matched nowhere/..."));
}
