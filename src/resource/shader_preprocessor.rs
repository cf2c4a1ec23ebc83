//! Version preprocessing of shader sources.
//!
//! Shader sources select between alternatives with exactly one idiom:
//!
//! ```text
//! #if __VERSION__ >= 130
//!     ...
//! #else
//!     ...
//! #endif
//! ```
//!
//! The branch is resolved here against the shader tier of the device, in a
//! single pass over the lines. Other `#if` blocks are only counted so that the
//! matching `#else`/`#endif` of a version test can be found; they are passed
//! through unresolved.

/// Preprocesses `source` for the given shader tier.
///
/// The output starts with a `// #version <tier>` marker line followed by every
/// line of the untaken branches removed, along with the directive lines of
/// the resolved version tests.
pub fn preprocess(source: &str, tier: u32) -> String {
    let mut out = String::with_capacity(source.len() + 16);
    out.push_str(&format!("// #version {tier}\n"));

    let mut filtered = false;
    let mut if_depth: i32 = 0;
    let mut filter_depth: Option<i32> = None;

    for line in source.lines() {
        if line.contains("__VERSION__") {
            debug_assert!(line.contains("#if"), "version macro outside of #if: {line}");
            debug_assert!(!filtered, "nested version test");
            if let Some(threshold) = version_threshold(line) {
                if line.contains(">=") && tier < threshold {
                    filtered = true;
                } else if line.contains('<') && !line.contains("<=") && tier >= threshold {
                    filtered = true;
                }
            }
            filter_depth = Some(if_depth);
            continue;
        } else if line.contains("#if") {
            if_depth += 1;
        } else if line.contains("#else") {
            if filter_depth == Some(if_depth) {
                filtered = !filtered;
                continue;
            }
        } else if line.contains("#endif") {
            if filter_depth == Some(if_depth) {
                filter_depth = None;
                filtered = false;
                continue;
            }
            if_depth -= 1;
        }

        if !filtered {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// The integer compared against `__VERSION__` on a directive line.
fn version_threshold(line: &str) -> Option<u32> {
    let after = &line[line.find("__VERSION__")? + "__VERSION__".len()..];
    let digits: String = after
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
struct VertexInput {
#if __VERSION__ >= 130
    @builtin(vertex_index) vertex_index: u32,
#else
    @location(7) vertex_id: f32,
#endif
}
";

    fn body(s: &str) -> Vec<&str> {
        s.lines().skip(1).collect()
    }

    #[test]
    fn low_tier_keeps_else_branch() {
        let out = preprocess(SOURCE, 120);
        assert!(out.starts_with("// #version 120\n"));
        assert_eq!(
            body(&out),
            vec!["struct VertexInput {", "    @location(7) vertex_id: f32,", "}"]
        );
    }

    #[test]
    fn high_tier_keeps_if_branch() {
        let out = preprocess(SOURCE, 150);
        assert_eq!(
            body(&out),
            vec![
                "struct VertexInput {",
                "    @builtin(vertex_index) vertex_index: u32,",
                "}"
            ]
        );
    }

    #[test]
    fn boundary_tier_counts_as_satisfied() {
        let out = preprocess(SOURCE, 130);
        assert!(out.contains("@builtin(vertex_index)"));
        assert!(!out.contains("vertex_id"));
    }

    #[test]
    fn less_than_test_is_inverted() {
        let src = "#if __VERSION__ < 130\nold\n#else\nnew\n#endif\n";
        assert_eq!(body(&preprocess(src, 120)), vec!["old"]);
        assert_eq!(body(&preprocess(src, 150)), vec!["new"]);
    }

    #[test]
    fn unrelated_blocks_pass_through() {
        let src = "\
#if __VERSION__ >= 130
#if FOO
a
#else
b
#endif
#else
c
#endif
";
        assert_eq!(
            body(&preprocess(src, 150)),
            vec!["#if FOO", "a", "#else", "b", "#endif"]
        );
        assert_eq!(body(&preprocess(src, 120)), vec!["c"]);
    }

    #[test]
    fn threshold_is_parsed() {
        assert_eq!(version_threshold("#if __VERSION__ >= 150"), Some(150));
        assert_eq!(version_threshold("#if __VERSION__<130 // x"), Some(130));
        assert_eq!(version_threshold("#if __VERSION__"), None);
    }
}
