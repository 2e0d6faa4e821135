//! Line-based unified diffs for `--diff` output.

use std::fmt::Write;
use std::path::Path;

const CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal(usize),
    Delete(usize),
    Insert(usize),
}

/// Renders a unified diff of `old` and `new` with three lines of context.
///
/// Returns an empty string when the contents are equal.
#[must_use]
pub fn unified_diff(path: &Path, old: &str, new: &str) -> String {
    let a: Vec<&str> = old.split_inclusive('\n').collect();
    let b: Vec<&str> = new.split_inclusive('\n').collect();
    let ops = shortest_edit(&a, &b);

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal(_)))
        .map(|(i, _)| i)
        .collect();
    let Some(&first) = changes.first() else {
        return String::new();
    };

    let mut groups = Vec::new();
    let (mut start, mut end) = (first, first);
    for &c in &changes[1..] {
        if c - end > 2 * CONTEXT {
            groups.push((start, end));
            start = c;
        }
        end = c;
    }
    groups.push((start, end));

    // Lines of `a` and `b` consumed before each op.
    let mut before = Vec::with_capacity(ops.len() + 1);
    let (mut ai, mut bi) = (0, 0);
    for op in &ops {
        before.push((ai, bi));
        match op {
            Op::Equal(_) => {
                ai += 1;
                bi += 1;
            }
            Op::Delete(_) => ai += 1,
            Op::Insert(_) => bi += 1,
        }
    }
    before.push((ai, bi));

    let mut out = format!("--- {0} (old)\n+++ {0} (new)\n", path.display());
    for (start, end) in groups {
        let lo = start.saturating_sub(CONTEXT);
        let hi = (end + CONTEXT + 1).min(ops.len());
        let (a_lo, b_lo) = before[lo];
        let (a_hi, b_hi) = before[hi];
        let _ = writeln!(
            out,
            "@@ -{} +{} @@",
            hunk_range(a_lo, a_hi - a_lo),
            hunk_range(b_lo, b_hi - b_lo)
        );
        for op in &ops[lo..hi] {
            let (prefix, line) = match *op {
                Op::Equal(i) => (' ', a[i]),
                Op::Delete(i) => ('-', a[i]),
                Op::Insert(j) => ('+', b[j]),
            };
            out.push(prefix);
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push_str("\n\\ No newline at end of file\n");
            }
        }
    }
    out
}

fn hunk_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{len}", start + 1),
    }
}

/// Myers' O(ND) shortest edit script.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn shortest_edit(a: &[&str], b: &[&str]) -> Vec<Op> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = (n + m) as usize;
    let offset = max as isize;
    let idx = |k: isize| (k + offset) as usize;

    let mut v = vec![0_isize; 2 * max + 2];
    let mut trace: Vec<Vec<isize>> = Vec::new();
    'search: for d in 0..=offset {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
                v[idx(k + 1)]
            } else {
                v[idx(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx(k)] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    let mut ops = Vec::with_capacity(max);
    let (mut x, mut y) = (n, m);
    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let prev_k = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[idx(prev_k)];
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            x -= 1;
            y -= 1;
            ops.push(Op::Equal(x as usize));
        }
        if d > 0 {
            if x == prev_x {
                ops.push(Op::Insert(prev_y as usize));
            } else {
                ops.push(Op::Delete(prev_x as usize));
            }
        }
        x = prev_x;
        y = prev_y;
    }
    ops.reverse();
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_have_no_diff() {
        assert_eq!(unified_diff(Path::new("a.rs"), "x\ny\n", "x\ny\n"), "");
    }

    #[test]
    fn single_line_change() {
        let old = "fn foo() {\n    bar();\n}\n";
        let new = "fn foo() {\n    baz();\n}\n";
        insta::assert_snapshot!(unified_diff(Path::new("src/lib.rs"), old, new), @r"
        --- src/lib.rs (old)
        +++ src/lib.rs (new)
        @@ -1,3 +1,3 @@
         fn foo() {
        -    bar();
        +    baz();
         }
        ");
    }

    #[test]
    fn insertion_into_file_without_trailing_newline() {
        let diff = unified_diff(Path::new("a.rs"), "mod a;", "/*hello*/\nmod a;\n");
        assert_eq!(
            diff,
            "--- a.rs (old)\n+++ a.rs (new)\n@@ -1 +1,2 @@\n\
             -mod a;\n\\ No newline at end of file\n+/*hello*/\n+mod a;\n"
        );
    }

    #[test]
    fn distant_changes_make_separate_hunks() {
        let old: String = (1..=20).map(|i| format!("{i}\n")).collect();
        let new = old.replacen("2\n", "two\n", 1).replacen("19\n", "nineteen\n", 1);
        let diff = unified_diff(Path::new("n.txt"), &old, &new);
        let hunks: Vec<&str> = diff.lines().filter(|l| l.starts_with("@@")).collect();
        assert_eq!(hunks, ["@@ -1,5 +1,5 @@", "@@ -16,5 +16,5 @@"]);
    }
}
