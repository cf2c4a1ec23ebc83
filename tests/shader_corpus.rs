//! Every built-in WGSL module must parse and validate at each capability
//! tier the preprocessor can be asked for.

use viewport_render::builtin;
use viewport_render::resource::preprocess;

const TIERS: [u32; 3] = [120, 130, 150];

fn validate(label: &str, source: &str) {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(e) => panic!("{label} failed to parse:\n{}", e.emit_to_string(source)),
    };
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    if let Err(e) = validator.validate(&module) {
        panic!("{label} failed to validate:\n{}", e.emit_to_string(source));
    }
}

#[test]
fn builtin_modules_validate_at_every_tier() {
    let files: Vec<String> = builtin::files().collect();
    assert!(!files.is_empty());
    for path in &files {
        let Some(source) = builtin::source(path) else {
            panic!("{path} is listed but has no source");
        };
        for tier in TIERS {
            let text = preprocess(&source, tier);
            assert!(!text.contains("__VERSION__"), "{path} at {tier} kept a version test");
            validate(&format!("{path} (tier {tier})"), &text);
        }
    }
}

#[test]
fn old_tiers_read_vertex_ordinals_from_an_attribute() {
    let source = builtin::source(&builtin::path("particles/imposter.wgsl", "vs_main")).unwrap();

    let legacy = preprocess(&source, 120);
    assert!(legacy.contains("@location(7)"));
    assert!(!legacy.contains("@builtin(vertex_index)"));

    let modern = preprocess(&source, 150);
    assert!(modern.contains("@builtin(vertex_index)"));
    assert!(!modern.contains("@location(7)"));
}

#[test]
fn legacy_tier_never_reads_builtin_vertex_index() {
    for path in builtin::files() {
        let legacy = preprocess(&builtin::source(&path).unwrap(), 120);
        assert!(!legacy.contains("@builtin(vertex_index)"), "{path}");
        // Instanced expansion needs the builtin and is compiled out.
        assert!(!legacy.contains("fn vs_expanded("), "{path}");
        assert!(!legacy.contains("fn vs_sprite("), "{path}");
    }
    let modern = preprocess(
        &builtin::source(&builtin::path("particles/cube.wgsl", "vs_cube")).unwrap(),
        130,
    );
    assert!(modern.contains("fn vs_cube_expanded("));
    assert!(modern.contains("fn vs_box_expanded("));
}

#[test]
fn every_program_entry_point_exists() {
    let entries = [
        ("particles/imposter.wgsl", "vs_main"),
        ("particles/cube.wgsl", "fs_sphere"),
        ("lines/line.wgsl", "vs_thin"),
        ("lines/line.wgsl", "vs_thick"),
        ("image/image.wgsl", "vs_main"),
        ("image/image.wgsl", "fs_main"),
    ];
    for (file, entry) in entries {
        assert!(builtin::has_entry(&builtin::path(file, entry)), "{file}#{entry}");
    }
}
