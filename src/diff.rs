//! Unified diff helpers.
//!
//! Pure functions for pulling file paths out of a diff and for checking that
//! generated text is a patch we are willing to hand to `git apply`.

use std::collections::BTreeSet;

use crate::error::CapabilityError;

const DEV_NULL: &str = "/dev/null";

/// Extracts the paths a diff touches, in first-seen order, without duplicates.
///
/// Paths come from `diff --git a/.. b/..` headers as well as the old-file
/// (`--- a/..`) and new-file (`+++ b/..`) markers, so a rename contributes
/// both its source and destination. Hunk bodies are skipped, so a removed
/// `-- comment` line (`--- comment`) is never taken for a marker.
pub(crate) fn extract_files_from_diff(diff: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    let mut push = |path: Option<String>| {
        if let Some(path) = path {
            if !files.contains(&path) {
                files.push(path);
            }
        }
    };

    let lines: Vec<&str> = diff.lines().collect();
    let mut hunk: Option<HunkRemaining> = None;
    // Inside a `diff --git` section markers must carry their `a/`/`b/` prefix
    let mut git_section = false;

    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            hunk = None;
            git_section = true;
            push(parse_git_header(rest));
            continue;
        }

        if let Some(remaining) = hunk.as_mut() {
            if line.starts_with("@@") {
                hunk = Some(HunkRemaining::parse(line));
                continue;
            }
            if !starts_file_header(&lines[i..]) && remaining.consume(line) {
                if remaining.is_done() {
                    hunk = None;
                }
                continue;
            }
            hunk = None;
        }

        if line.starts_with("@@") {
            hunk = Some(HunkRemaining::parse(line));
        } else if let Some(rest) = line.strip_prefix("--- ") {
            push(parse_marker(rest, "a/", git_section));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            push(parse_marker(rest, "b/", git_section));
        }
    }

    files
}

/// Old/new lines still expected in the current hunk.
#[derive(Debug, Clone, Copy)]
struct HunkRemaining {
    old: u32,
    new: u32,
}

impl HunkRemaining {
    /// Reads the counts of `@@ -a,b +c,d @@`. A header without counts (as
    /// generated patches sometimes have) keeps the hunk open until the next
    /// file header.
    fn parse(header: &str) -> Self {
        let mut ranges = header.trim_start_matches('@').split_whitespace();
        let count = |range: Option<&str>, sign: char| -> Option<u32> {
            let range = range?.strip_prefix(sign)?;
            match range.split_once(',') {
                Some((_, len)) => len.parse().ok(),
                None => range.parse::<u32>().ok().map(|_| 1),
            }
        };

        match (count(ranges.next(), '-'), count(ranges.next(), '+')) {
            (Some(old), Some(new)) => Self { old, new },
            _ => Self {
                old: u32::MAX,
                new: u32::MAX,
            },
        }
    }

    /// Accounts for one body line. Returns false if the line cannot belong
    /// to a hunk.
    fn consume(&mut self, line: &str) -> bool {
        match line.chars().next() {
            None | Some(' ') => {
                self.old = self.old.saturating_sub(1);
                self.new = self.new.saturating_sub(1);
            }
            Some('-') => self.old = self.old.saturating_sub(1),
            Some('+') => self.new = self.new.saturating_sub(1),
            Some('\\') => {}
            Some(_) => return false,
        }
        true
    }

    fn is_done(self) -> bool {
        self.old == 0 && self.new == 0
    }
}

/// A `---` line followed by `+++` and `@@` starts a new file.
fn starts_file_header(lines: &[&str]) -> bool {
    matches!(
        lines,
        [old, new, hunk, ..]
            if old.starts_with("--- ") && new.starts_with("+++ ") && hunk.starts_with("@@")
    )
}

/// `a/<old> b/<new>` -> `<old>`.
fn parse_git_header(rest: &str) -> Option<String> {
    let rest = unquote(rest.trim());
    let old = rest.strip_prefix("a/")?;
    let split = old.rfind(" b/")?;
    non_empty(&old[..split])
}

/// `a/<path>\t<timestamp>` -> `<path>`; `/dev/null` is skipped. With
/// `require_prefix` a path lacking `prefix` is not a marker.
fn parse_marker(rest: &str, prefix: &str, require_prefix: bool) -> Option<String> {
    let path = rest.split('\t').next().unwrap_or(rest).trim_end();
    let path = unquote(path);
    if path == DEV_NULL {
        return None;
    }
    match path.strip_prefix(prefix) {
        Some(stripped) => non_empty(stripped),
        None if require_prefix => None,
        None => non_empty(path),
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Unwraps output that models wrap in a Markdown code fence
/// (```` ```diff ```` ... ```` ``` ````).
///
/// Only an unindented fence is recognised, and text before the opening or
/// after the closing fence is dropped. Lines between the fences are kept
/// verbatim: a patch context line is indented, so ` ```rust` survives.
pub(crate) fn strip_code_fences(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();

    let mut body: &[&str] = match lines.iter().position(|line| line.starts_with("```")) {
        Some(open) => {
            let rest = &lines[open + 1..];
            let close = rest
                .iter()
                .position(|line| line.trim_end() == "```")
                .unwrap_or(rest.len());
            &rest[..close]
        }
        None => &lines,
    };

    while let [first, rest @ ..] = body {
        if !first.trim().is_empty() {
            break;
        }
        body = rest;
    }
    // Only truly empty trailing lines: " " may be a context line
    while let [rest @ .., last] = body {
        if !last.is_empty() {
            break;
        }
        body = rest;
    }

    body.join("\n")
}

/// Validates generated text as a patch that only touches `allowed` files.
///
/// Returns the cleaned patch (code fences stripped, trailing newline ensured)
/// or a `MalformedOutput` error.
pub(crate) fn validate_patch(
    text: &str,
    allowed: &BTreeSet<&str>,
) -> Result<String, CapabilityError> {
    const STAGE: &str = "fix";

    let patch = strip_code_fences(text);
    let has = |prefix: &str| patch.lines().any(|line| line.starts_with(prefix));

    if !has("--- ") || !has("+++ ") {
        return Err(CapabilityError::malformed(
            STAGE,
            "missing '---'/'+++' file headers",
        ));
    }
    if !has("@@") {
        return Err(CapabilityError::malformed(STAGE, "missing '@@' hunk header"));
    }

    let referenced = extract_files_from_diff(&patch);
    if referenced.is_empty() {
        return Err(CapabilityError::malformed(STAGE, "patch references no files"));
    }
    let unknown: Vec<&str> = referenced
        .iter()
        .map(String::as_str)
        .filter(|path| !allowed.contains(path))
        .collect();
    if !unknown.is_empty() {
        return Err(CapabilityError::malformed(
            STAGE,
            format!(
                "patch touches files outside the supplied context: {}",
                unknown.join(", ")
            ),
        ));
    }

    let mut patch = patch;
    patch.push('\n');
    Ok(patch)
}

/// Number of lines in a patch, for progress display.
pub(crate) fn line_count(text: &str) -> usize {
    text.lines().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DIFF: &str = "\
diff --git a/src/app.ts b/src/app.ts
index 1111111..2222222 100644
--- a/src/app.ts
+++ b/src/app.ts
@@ -1,3 +1,3 @@
-const x = 1;
+const x = 2;
diff --git a/src/util.ts b/src/util.ts
--- a/src/util.ts
+++ b/src/util.ts
@@ -5 +5 @@
-a
+b
";

    #[test]
    fn test_extract_files_dedups_in_order() {
        let files = extract_files_from_diff(SAMPLE_DIFF);
        assert_eq!(files, vec!["src/app.ts", "src/util.ts"]);
    }

    #[test]
    fn test_extract_files_rename_includes_both_paths() {
        let diff = "\
diff --git a/old/name.rs b/new/name.rs
similarity index 90%
rename from old/name.rs
rename to new/name.rs
--- a/old/name.rs
+++ b/new/name.rs
";
        let files = extract_files_from_diff(diff);
        assert_eq!(files, vec!["old/name.rs", "new/name.rs"]);
    }

    #[test]
    fn test_extract_files_new_and_deleted_files() {
        let diff = "\
diff --git a/added.txt b/added.txt
new file mode 100644
--- /dev/null
+++ b/added.txt
diff --git a/gone.txt b/gone.txt
deleted file mode 100644
--- a/gone.txt
+++ /dev/null
";
        let files = extract_files_from_diff(diff);
        assert_eq!(files, vec!["added.txt", "gone.txt"]);
    }

    #[test]
    fn test_extract_files_without_git_header() {
        let diff = "--- a/lib.py\t2024-01-01\n+++ b/lib.py\t2024-01-02\n@@ -1 +1 @@\n";
        assert_eq!(extract_files_from_diff(diff), vec!["lib.py"]);
    }

    #[test]
    fn test_extract_files_path_with_spaces() {
        let diff = "diff --git a/docs/read me.md b/docs/read me.md\n";
        assert_eq!(extract_files_from_diff(diff), vec!["docs/read me.md"]);
    }

    #[test]
    fn test_extract_files_ignores_marker_like_hunk_lines() {
        let diff = "\
diff --git a/db/schema.sql b/db/schema.sql
--- a/db/schema.sql
+++ b/db/schema.sql
@@ -1,2 +1,2 @@
--- legacy column
+++ counter
 select 1;
diff --git a/db/seed.sql b/db/seed.sql
--- a/db/seed.sql
+++ b/db/seed.sql
@@ -1 +1 @@
-a
+b
";
        assert_eq!(
            extract_files_from_diff(diff),
            vec!["db/schema.sql", "db/seed.sql"]
        );
    }

    #[test]
    fn test_extract_files_hunk_without_counts() {
        let diff = "\
--- a/init.lua
+++ b/init.lua
@@
--- old note
+-- new note
--- a/util.lua
+++ b/util.lua
@@
-x
+y
";
        assert_eq!(extract_files_from_diff(diff), vec!["init.lua", "util.lua"]);
    }

    #[test]
    fn test_extract_files_git_markers_need_prefix() {
        let diff = "\
diff --git a/notes.txt b/notes.txt
--- notes.txt
+++ b/notes.txt
";
        assert_eq!(extract_files_from_diff(diff), vec!["notes.txt"]);

        let diff = "diff --git a/x.txt b/x.txt\n--- stray\n+++ b/x.txt\n";
        assert_eq!(extract_files_from_diff(diff), vec!["x.txt"]);
    }

    #[test]
    fn test_extract_files_multiple_hunks() {
        let diff = "\
--- a/app.hs
+++ b/app.hs
@@ -1,2 +1,2 @@
--- TODO remove
+-- done
 main = pure ()
@@ -10 +10 @@
--- second
+-- again
";
        assert_eq!(extract_files_from_diff(diff), vec!["app.hs"]);
    }

    #[test]
    fn test_extract_files_empty() {
        assert!(extract_files_from_diff("").is_empty());
    }

    #[test]
    fn test_strip_code_fences() {
        let text = "```diff\n--- a/x\n+++ b/x\n```\n";
        assert_eq!(strip_code_fences(text), "--- a/x\n+++ b/x");
    }

    #[test]
    fn test_strip_code_fences_keeps_indented_fences() {
        let patch = "--- a/README.md\n+++ b/README.md\n@@ -1,3 +1,3 @@\n ```rust\n-let x = 1;\n+let x = 2;\n ```";
        assert_eq!(strip_code_fences(patch), patch);

        let wrapped = format!("Here is the fix:\n```diff\n{patch}\n```\nLet me know.");
        assert_eq!(strip_code_fences(&wrapped), patch);
    }

    #[test]
    fn test_strip_code_fences_blank_output() {
        assert_eq!(strip_code_fences("  \n\n"), "");
        assert_eq!(strip_code_fences("```\n```"), "");
    }

    #[test]
    fn test_validate_patch_keeps_markdown_context() {
        let allowed = BTreeSet::from(["README.md"]);
        let text = "--- a/README.md\n+++ b/README.md\n@@ -1,3 +1,3 @@\n ```rust\n-let x = 1;\n+let x = 2;\n ```\n";
        assert_eq!(validate_patch(text, &allowed).unwrap(), text);
    }

    #[test]
    fn test_validate_patch_accepts_removed_sql_comment() {
        let allowed = BTreeSet::from(["db/schema.sql"]);
        let text = "diff --git a/db/schema.sql b/db/schema.sql\n--- a/db/schema.sql\n+++ b/db/schema.sql\n@@ -1,2 +1,1 @@\n--- legacy column\n select 1;\n";
        assert_eq!(validate_patch(text, &allowed).unwrap(), text);
    }

    #[test]
    fn test_validate_patch_accepts_known_files() {
        let allowed = BTreeSet::from(["src/app.ts"]);
        let text = "```diff\n--- a/src/app.ts\n+++ b/src/app.ts\n@@ -1 +1 @@\n-a\n+b\n```";
        let patch = validate_patch(text, &allowed).unwrap();
        assert!(patch.starts_with("--- a/src/app.ts"));
        assert!(patch.ends_with("+b\n"));
    }

    #[test]
    fn test_validate_patch_rejects_prose() {
        let allowed = BTreeSet::from(["src/app.ts"]);
        let err = validate_patch("I changed x to 2 in app.ts", &allowed).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_validate_patch_requires_hunk() {
        let allowed = BTreeSet::from(["a.rs"]);
        let err = validate_patch("--- a/a.rs\n+++ b/a.rs\n", &allowed).unwrap_err();
        assert!(err.to_string().contains("@@"));
    }

    #[test]
    fn test_validate_patch_rejects_unknown_files() {
        let allowed = BTreeSet::from(["a.rs"]);
        let text = "--- a/b.rs\n+++ b/b.rs\n@@ -1 +1 @@\n-x\n+y\n";
        let err = validate_patch(text, &allowed).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("b.rs"));
    }

    #[test]
    fn test_line_count() {
        assert_eq!(line_count("a\nb\nc\n"), 3);
        assert_eq!(line_count(""), 0);
    }
}
