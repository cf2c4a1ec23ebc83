//! Built-in WGSL programs.
//!
//! Shader stages are addressed by virtual paths such as
//! `:/core/wgsl/particles/imposter.wgsl#vs_main`: the file part selects one
//! of the embedded sources, the fragment after `#` names the entry point.
//! Every file is compiled together with `common.wgsl`, which declares the
//! per-draw uniform block and the helpers shared by all programs.

/// Declarations prepended to every built-in file.
pub static COMMON_SRC: &str = include_str!("common.wgsl");

/// Prefix of all virtual paths served by [`file`].
pub const PATH_PREFIX: &str = ":/core/wgsl/";

static FILES: &[(&str, &str)] = &[
    ("particles/imposter.wgsl", include_str!("particles/imposter.wgsl")),
    ("particles/cube.wgsl", include_str!("particles/cube.wgsl")),
    ("arrows/shaded.wgsl", include_str!("arrows/shaded.wgsl")),
    ("arrows/flat.wgsl", include_str!("arrows/flat.wgsl")),
    ("cylinder/raytraced.wgsl", include_str!("cylinder/raytraced.wgsl")),
    ("lines/line.wgsl", include_str!("lines/line.wgsl")),
    ("mesh/mesh.wgsl", include_str!("mesh/mesh.wgsl")),
    ("image/image.wgsl", include_str!("image/image.wgsl")),
];

/// Splits a stage path into its file path and entry point.
///
/// A path without `#` names the `main` entry point.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.split_once('#') {
        Some((file, entry)) => (file, entry),
        None => (path, "main"),
    }
}

/// Raw text of an embedded file, without the common declarations.
pub fn file(path: &str) -> Option<&'static str> {
    let (file, _) = split_path(path);
    let relative = file.strip_prefix(PATH_PREFIX)?;
    FILES
        .iter()
        .find(|(name, _)| *name == relative)
        .map(|(_, text)| *text)
}

/// Complete, not yet preprocessed, source of the module containing `path`.
pub fn source(path: &str) -> Option<String> {
    file(path).map(|text| {
        let mut source = String::with_capacity(COMMON_SRC.len() + text.len() + 1);
        source.push_str(COMMON_SRC);
        source.push('\n');
        source.push_str(text);
        source
    })
}

/// Whether the module containing `path` defines its entry point.
pub fn has_entry(path: &str) -> bool {
    let (_, entry) = split_path(path);
    source(path).is_some_and(|text| defines_function(&text, entry))
}

pub(crate) fn defines_function(source: &str, name: &str) -> bool {
    let needle = format!("fn {}(", name);
    source.contains(&needle)
}

/// Virtual paths of all embedded files.
pub fn files() -> impl Iterator<Item = String> {
    FILES
        .iter()
        .map(|(name, _)| format!("{}{}", PATH_PREFIX, name))
}

/// Full virtual path of `file` in the built-in corpus.
pub fn path(file: &str, entry: &str) -> String {
    format!("{}{}#{}", PATH_PREFIX, file, entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_resolve_to_embedded_files() {
        assert!(file(":/core/wgsl/particles/imposter.wgsl#vs_main").is_some());
        assert!(file(":/core/wgsl/particles/imposter.wgsl").is_some());
        assert!(file(":/core/wgsl/particles/missing.wgsl").is_none());
        assert!(file("particles/imposter.wgsl").is_none());
    }

    #[test]
    fn sources_carry_the_common_block() {
        let text = source(&path("lines/line.wgsl", "vs_thin")).unwrap();
        assert!(text.starts_with(COMMON_SRC));
        assert!(text.contains("fn vs_thick("));
    }

    #[test]
    fn entry_lookup() {
        assert!(has_entry(&path("particles/cube.wgsl", "fs_sphere")));
        assert!(!has_entry(&path("particles/cube.wgsl", "fs_missing")));
        assert_eq!(split_path("a.wgsl"), ("a.wgsl", "main"));
    }
}
