//! End-to-end runs of the command line against on-disk workspaces.

use passkit_cli::{exit, run_with_loader};
use passkit_core::{
    Analyzer, Diagnostic, Fact, FactType, FlagSpec, ManifestLoader, Pos, SuggestedFix, TextEdit,
    MANIFEST_FILE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct Output {
    code: i32,
    stdout: String,
    stderr: String,
}

fn workspace(manifest: &str, files: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(MANIFEST_FILE), manifest).unwrap();
    // Keeps a global config out of the runs.
    fs::write(tmp.path().join("passkit.toml"), "").unwrap();
    for (name, content) in files {
        let path = tmp.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    tmp
}

fn package(path: &str) -> String {
    format!("[[package]]\npath = \"{path}\"\ndir = \"{path}\"\n")
}

fn run(tmp: &TempDir, analyzers: &[Arc<Analyzer>], args: &[&str]) -> Output {
    let dir = tmp.path().display().to_string();
    let mut argv = vec!["passkit", "-C", &dir];
    argv.extend_from_slice(args);

    let loader = ManifestLoader::new(tmp.path());
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run_with_loader(argv, analyzers, &loader, &mut stdout, &mut stderr);
    Output {
        code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

fn read(tmp: &TempDir, name: &str) -> String {
    fs::read_to_string(tmp.path().join(name)).unwrap()
}

fn scrub(text: &str, tmp: &TempDir) -> String {
    text.replace(&tmp.path().display().to_string(), "[ROOT]")
}

/// Replaces the identifier `from` with the value of its `to` flag.
fn replacer(name: &str, from: &'static str, default_to: &str) -> Arc<Analyzer> {
    Analyzer::builder(name)
        .doc(format!("replaces {from}"))
        .flag(FlagSpec::string("to", default_to, "replacement identifier"))
        .run(move |pass| {
            let to = pass.flag("to").unwrap_or_default().to_string();
            let mut found = Vec::new();
            for file in pass.files() {
                for (offset, _) in file.content().match_indices(from) {
                    let pos = file.token().pos(offset);
                    found.push((pos, pos.add(from.len())));
                }
            }
            for (pos, end) in found {
                pass.report(
                    Diagnostic::new(pos, format!("{from} should be {to}"))
                        .with_end(end)
                        .with_fix(SuggestedFix::new(
                            format!("use {to}"),
                            vec![TextEdit::new(pos, end, to.clone())],
                        )),
                );
            }
            Ok(None)
        })
        .build()
        .unwrap()
}

fn pkgname() -> Arc<Analyzer> {
    Analyzer::builder("pkgname")
        .doc("reports the package name of every file")
        .url("https://example.com/pkgname")
        .run(|pass| {
            let name = pass.package().name.clone();
            let starts: Vec<Pos> = pass.files().iter().map(|f| f.token().start()).collect();
            for pos in starts {
                pass.report_at(pos, format!("package name is {name}"));
            }
            Ok(None)
        })
        .build()
        .unwrap()
}

#[derive(Debug, Serialize, Deserialize)]
struct Seen;

impl Fact for Seen {
    const KIND: &'static str = "seen";
}

fn noop(name: &str, with_facts: bool, ran: &Arc<AtomicBool>) -> Arc<Analyzer> {
    let ran = Arc::clone(ran);
    let mut builder = Analyzer::builder(name)
        .doc("does nothing")
        .run_despite_errors(true)
        .run(move |_| {
            ran.store(true, Ordering::SeqCst);
            Ok(None)
        });
    if with_facts {
        builder = builder.fact_type(FactType::of::<Seen>());
    }
    builder.build().unwrap()
}

const ILL_TYPED: &str = r#"
[[package]]
path = "p"
dir = "p"

[[package.type_errors]]
at = "p.rs:1:18"
message = "mismatched types"
"#;

#[test]
fn rename_fix_rewrites_the_file() {
    let tmp = workspace(
        &package("rename"),
        &[("rename/foo.rs", "fn foo() { let bar = 12; let _ = bar; }\n")],
    );
    let out = run(&tmp, &[replacer("rename", "bar", "baz")], &["-fix", "rename"]);

    assert_eq!(out.code, exit::SUCCESS, "{}", out.stderr);
    assert_eq!(
        read(&tmp, "rename/foo.rs"),
        "fn foo() { let baz = 12; let _ = baz; }\n"
    );
}

#[test]
fn analyzer_flag_values_reach_the_fix() {
    let tmp = workspace(&package("rename"), &[("rename/foo.rs", "fn bar() {}\n")]);
    let out = run(
        &tmp,
        &[replacer("rename", "bar", "baz")],
        &["-fix", "-rename.to=quux", "rename"],
    );

    assert_eq!(out.code, exit::SUCCESS, "{}", out.stderr);
    assert_eq!(read(&tmp, "rename/foo.rs"), "fn quux() {}\n");
}

#[test]
fn insertion_without_end_position() {
    let tmp = workspace(&package("a"), &[("a/a.rs", "const A: () = ();\n\nfn f() {}\n")]);
    let noend = Analyzer::builder("noend")
        .doc("greets the first function")
        .run(|pass| {
            let file = &pass.files()[0];
            let pos = file.token().pos(file.content().find("fn f").unwrap_or(0));
            pass.report(Diagnostic::new(pos, "hello").with_fix(SuggestedFix::new(
                "say hello",
                vec![TextEdit::new(pos, Pos::NONE, "/*hello*/\n")],
            )));
            Ok(None)
        })
        .build()
        .unwrap();

    let out = run(&tmp, &[noend], &["-fix", "a"]);
    assert_eq!(out.code, exit::SUCCESS, "{}", out.stderr);
    assert_eq!(read(&tmp, "a/a.rs"), "const A: () = ();\n\n/*hello*/\nfn f() {}\n");
}

#[test]
fn conflicting_fixes_are_reported_and_not_applied() {
    let original = "fn foo() { let bar = 12; }\n";
    let tmp = workspace(&package("conflict"), &[("conflict/foo.rs", original)]);
    let out = run(
        &tmp,
        &[replacer("rename", "bar", "baz"), replacer("other", "bar", "qux")],
        &["-fix", "conflict"],
    );

    assert_eq!(out.code, exit::FAILURE);
    assert!(
        out.stderr.contains("conflicting edits from other and rename on "),
        "{}",
        out.stderr
    );
    assert!(out.stderr.contains("foo.rs"));
    assert_eq!(read(&tmp, "conflict/foo.rs"), original);
}

#[test]
fn ill_typed_package_skips_fact_free_analyzer() {
    let tmp = workspace(ILL_TYPED, &[("p/p.rs", "fn f() -> i32 { \"\" }\n")]);
    let ran = Arc::new(AtomicBool::new(false));
    let out = run(&tmp, &[noop("noop", false, &ran)], &["p"]);

    assert_eq!(out.code, exit::FAILURE);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(out.stderr.contains("mismatched types"), "{}", out.stderr);
    assert!(out.stderr.contains("noop@p"), "{}", out.stderr);
}

#[test]
fn ill_typed_package_runs_fact_analyzer() {
    let tmp = workspace(ILL_TYPED, &[("p/p.rs", "fn f() -> i32 { \"\" }\n")]);
    let ran = Arc::new(AtomicBool::new(false));
    let out = run(&tmp, &[noop("noopfact", true, &ran)], &["p"]);

    assert_eq!(out.code, exit::FAILURE);
    assert!(ran.load(Ordering::SeqCst));
    assert!(out.stderr.contains("mismatched types"), "{}", out.stderr);
}

#[test]
fn diagnostics_without_fix_exit_with_three() {
    let tmp = workspace(
        &package("p"),
        &[("p/a.rs", "fn a() {}\n"), ("p/b.rs", "fn b() {}\n")],
    );
    let out = run(&tmp, &[pkgname()], &["p"]);

    assert_eq!(out.code, exit::DIAGNOSTICS);
    assert_eq!(
        scrub(&out.stdout, &tmp),
        "[ROOT]/p/a.rs:1:1: [pkgname] package name is p\n\
         [ROOT]/p/b.rs:1:1: [pkgname] package name is p\n"
    );
}

#[test]
fn json_output_forwards_the_analyzer_url() {
    let tmp = workspace(&package("p"), &[("p/a.rs", "fn a() {}\n")]);
    let out = run(&tmp, &[pkgname()], &["-json", "p"]);

    assert_eq!(out.code, exit::SUCCESS, "{}", out.stderr);
    let tree: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    let diags = tree
        .as_object()
        .and_then(|pkgs| pkgs.values().next())
        .and_then(|analyzers| analyzers.get("pkgname"))
        .and_then(serde_json::Value::as_array)
        .unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0]["message"], "package name is p");
    assert_eq!(diags[0]["url"], "https://example.com/pkgname");
}

#[test]
fn diff_prints_and_leaves_files_alone() {
    let original = "fn foo() {\n    bar();\n}\n";
    let tmp = workspace(&package("d"), &[("d/lib.rs", original)]);
    let out = run(&tmp, &[replacer("rename", "bar", "baz")], &["-diff", "d"]);

    assert_eq!(out.code, exit::SUCCESS, "{}", out.stderr);
    assert_eq!(read(&tmp, "d/lib.rs"), original);
    insta::assert_snapshot!(scrub(&out.stdout, &tmp), @r"
    --- [ROOT]/d/lib.rs (old)
    +++ [ROOT]/d/lib.rs (new)
    @@ -1,3 +1,3 @@
     fn foo() {
    -    bar();
    +    baz();
     }
    ");
}

#[test]
fn disabling_an_analyzer_runs_the_others() {
    let tmp = workspace(&package("p"), &[("p/a.rs", "fn bar() {}\n")]);
    let out = run(
        &tmp,
        &[replacer("rename", "bar", "baz"), pkgname()],
        &["-rename=false", "p"],
    );

    assert_eq!(out.code, exit::DIAGNOSTICS);
    assert!(out.stdout.contains("[pkgname]"));
    assert!(!out.stdout.contains("[rename]"));
}

#[test]
fn unmatched_patterns_fail() {
    let tmp = workspace(&package("p"), &[("p/a.rs", "fn a() {}\n")]);
    let out = run(&tmp, &[pkgname()], &["nothing/..."]);

    assert_eq!(out.code, exit::FAILURE);
    assert!(out.stderr.contains("no packages matched nothing/..."));
}

#[test]
fn missing_patterns_print_usage() {
    let tmp = workspace(&package("p"), &[]);
    let out = run(&tmp, &[pkgname()], &[]);

    assert_eq!(out.code, exit::FAILURE);
    assert!(out.stderr.starts_with("usage: passkit"));
}

#[test]
fn flags_are_listed_as_json() {
    let tmp = workspace(&package("p"), &[]);
    let out = run(
        &tmp,
        &[replacer("rename", "bar", "baz"), pkgname()],
        &["-flags"],
    );

    assert_eq!(out.code, exit::SUCCESS);
    insta::assert_snapshot!(out.stdout, @r#"
    [
      {
        "Name": "diff",
        "Bool": true,
        "Usage": "with -fix, don't update the files, but print a unified diff"
      },
      {
        "Name": "fix",
        "Bool": true,
        "Usage": "apply all suggested fixes"
      },
      {
        "Name": "json",
        "Bool": true,
        "Usage": "emit JSON output"
      },
      {
        "Name": "pkgname",
        "Bool": true,
        "Usage": "enable pkgname analysis"
      },
      {
        "Name": "rename",
        "Bool": true,
        "Usage": "enable rename analysis"
      },
      {
        "Name": "rename.to",
        "Bool": false,
        "Usage": "replacement identifier"
      }
    ]
    "#);
}

#[test]
fn unknown_flags_are_usage_errors() {
    let tmp = workspace(&package("p"), &[]);
    let out = run(&tmp, &[pkgname()], &["-nonsense", "p"]);

    assert_eq!(out.code, 2);
    assert!(out.stderr.contains("--nonsense"), "{}", out.stderr);
}

#[test]
fn file_patterns_are_relative_to_the_root() {
    let tmp = workspace(&package("p"), &[("p/a.rs", "fn a() {}\n")]);
    let out = run(&tmp, &[pkgname()], &["file=p/a.rs"]);
    assert_eq!(out.code, exit::DIAGNOSTICS, "{}", out.stderr);
}
