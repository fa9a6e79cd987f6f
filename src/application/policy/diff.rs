//! Line-based unified diff used by policy-change audit events.

/// Produces a unified diff between two texts. Output is a single hunk in
/// standard `---`/`+++`/`@@` framing; empty string when the inputs match.
pub fn unified_diff(old: &str, new: &str, from_label: &str, to_label: &str) -> String {
    if old == new {
        return String::new();
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = diff_ops(&old_lines, &new_lines);

    let mut out = String::new();
    out.push_str(&format!("--- {from_label}\n"));
    out.push_str(&format!("+++ {to_label}\n"));
    out.push_str(&format!(
        "@@ -1,{} +1,{} @@\n",
        old_lines.len(),
        new_lines.len()
    ));
    for op in ops {
        match op {
            DiffOp::Equal(line) => {
                out.push(' ');
                out.push_str(line);
                out.push('\n');
            }
            DiffOp::Delete(line) => {
                out.push('-');
                out.push_str(line);
                out.push('\n');
            }
            DiffOp::Insert(line) => {
                out.push('+');
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

enum DiffOp<'a> {
    Equal(&'a str),
    Delete(&'a str),
    Insert(&'a str),
}

/// Longest-common-subsequence walk. Policy documents are small, so the
/// quadratic table is fine.
fn diff_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffOp<'a>> {
    let n = old.len();
    let m = new.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(DiffOp::Equal(old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(DiffOp::Delete(old[i]));
            i += 1;
        } else {
            ops.push(DiffOp::Insert(new[j]));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Delete(old[i]));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Insert(new[j]));
        j += 1;
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_inputs_produce_empty_diff() {
        assert_eq!(unified_diff("a\nb\n", "a\nb\n", "old", "new"), "");
    }

    #[test]
    fn test_changed_line_marked_both_ways() {
        let diff = unified_diff(
            "max_position: 0.25\nmax_sector: 0.40\n",
            "max_position: 0.15\nmax_sector: 0.40\n",
            "policies@v1",
            "policies@v2",
        );
        assert!(diff.contains("--- policies@v1"));
        assert!(diff.contains("+++ policies@v2"));
        assert!(diff.contains("-max_position: 0.25"));
        assert!(diff.contains("+max_position: 0.15"));
        assert!(diff.contains(" max_sector: 0.40"));
    }

    #[test]
    fn test_pure_insertion() {
        let diff = unified_diff("a\n", "a\nb\n", "old", "new");
        assert!(diff.contains("+b"));
        assert!(!diff.contains("-a"));
    }
}
