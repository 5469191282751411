//! Project Data Model Tests
//!
//! Tests for:
//! - Project JSON: defaults, ignored unknown keys, first-mismatch errors
//! - Fingerprints: serialization round trip, bit-exact float handling
//! - RenderElement: CLI name round trip

use lensflare::data::{Project, RenderElement};
use lensflare::fingerprint::Fingerprint;

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn empty_document_takes_documented_defaults() {
    let project = Project::from_json("{}").unwrap();
    assert_eq!(project.flare.lens.sensor_size, [36.0, 24.0]);
    assert_eq!(project.flare.lens.fstop, 8.0);
    assert_eq!(project.render.resolution, [512, 512]);
    assert_eq!(project.render.bin_size, 64);
    assert_eq!(project.render.grid_count, 33);
    assert_eq!(project.render.debug_ghost, None);
    assert_eq!(project.output.colorspace, "ACES - ACEScg");
    assert!(project.flare.lens.coating_lens_elements.is_empty());
}

#[test]
fn unknown_keys_are_ignored() {
    let project = Project::from_json(
        r#"{
            "render": { "resolution": [64, 64], "legacy_field": true },
            "window_state": {}
        }"#,
    )
    .unwrap();
    assert_eq!(project.render.resolution, [64, 64]);
}

#[test]
fn type_mismatch_is_a_project_error() {
    let result = Project::from_json(r#"{ "render": { "resolution": "large" } }"#);
    assert!(result.is_err());
}

#[test]
fn missing_subtrees_default_recursively() {
    let project = Project::from_json(r#"{ "flare": { "light": { "intensity": 3.0 } } }"#).unwrap();
    assert_eq!(project.flare.light.intensity, 3.0);
    assert_eq!(project.flare.light.position, [0.0, 0.0]);
    assert_eq!(project.flare.ghost.fstop, 8.0);
}

// ============================================================================
// Round trip & fingerprints
// ============================================================================

#[test]
fn json_round_trip_preserves_the_fingerprint() {
    let mut project = Project::default();
    project.flare.light.position = [-0.25, 0.75];
    project.flare.lens.coating_lens_elements = vec![420, 537, 615];
    project.render.wavelength_count = 3;
    project.render.debug_ghost = Some(4);

    let json = project.to_json().unwrap();
    let reloaded = Project::from_json(&json).unwrap();
    assert_eq!(reloaded, project);
    assert_eq!(reloaded.fingerprint(), project.fingerprint());
}

#[test]
fn fingerprints_differ_on_any_input_change() {
    let base = Project::default();
    let mut changed = base.clone();
    changed.flare.light.intensity = 1.000_001;
    assert_ne!(base.fingerprint(), changed.fingerprint());

    let mut changed = base.clone();
    changed.render.device = "mystery gpu".to_string();
    assert_ne!(base.fingerprint(), changed.fingerprint());
}

#[test]
fn negative_zero_is_a_distinct_fingerprint() {
    let base = Project::default();
    let mut negated = base.clone();
    negated.flare.light.position = [-0.0, 0.0];
    assert_ne!(base.fingerprint(), negated.fingerprint());
}

// ============================================================================
// Render elements
// ============================================================================

#[test]
fn element_names_round_trip() {
    for element in RenderElement::ALL {
        let parsed: RenderElement = element.name().parse().unwrap();
        assert_eq!(parsed, element);
    }
    assert!("GHOST_aperture".parse::<RenderElement>().is_ok());
    assert!("SPARKLES".parse::<RenderElement>().is_err());
}
