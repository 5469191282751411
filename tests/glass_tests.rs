//! Glass Catalogue Tests
//!
//! Tests for:
//! - sellmeier: known BK7 values, normal dispersion over the visible band
//! - closest_glass: metric, ties, abbe offset, degenerate inputs
//! - glasses_from_path: YAML parsing, skipping of non-Sellmeier files

use std::io::Write;

use lensflare::lens::glass::{Glass, closest_glass, glasses_from_path, sellmeier};

/// Schott N-BK7.
const BK7: [f32; 6] = [
    1.039_612_1,
    0.006_000_698_7,
    0.231_792_34,
    0.020_017_914,
    1.010_469_5,
    103.560_65,
];

fn glass(name: &str, n: f32, v: f32) -> Glass {
    Glass {
        name: name.to_string(),
        manufacturer: "test".to_string(),
        n,
        v,
        coefficients: BK7,
    }
}

// ============================================================================
// Sellmeier
// ============================================================================

#[test]
fn sellmeier_matches_bk7_at_the_d_line() {
    let nd = sellmeier(&BK7, 587.6);
    assert!((nd - 1.5168).abs() < 1e-3, "got {nd}");
}

#[test]
fn dispersion_is_monotonic_over_the_visible_band() {
    // normal dispersion: n falls with wavelength across [400, 700] nm
    let mut previous = sellmeier(&BK7, 400.0);
    for step in 1..=30 {
        let wavelength = 400.0 + step as f32 * 10.0;
        let n = sellmeier(&BK7, wavelength);
        assert!(
            n < previous,
            "n({wavelength}) = {n} not below n({}) = {previous}",
            wavelength - 10.0
        );
        previous = n;
    }
}

// ============================================================================
// Closest match
// ============================================================================

#[test]
fn closest_glass_minimizes_normalized_distance() {
    let glasses = vec![
        glass("crown", 1.52, 64.0),
        glass("flint", 1.62, 36.0),
        glass("dense-flint", 1.75, 27.0),
    ];
    let best = closest_glass(&glasses, 1.61, 37.0, 0.0).unwrap();
    assert_eq!(best.name, "flint");
}

#[test]
fn ties_resolve_to_the_first_candidate() {
    let glasses = vec![glass("first", 1.5, 60.0), glass("twin", 1.5, 60.0)];
    let best = closest_glass(&glasses, 1.5, 60.0, 0.0).unwrap();
    assert_eq!(best.name, "first");
}

#[test]
fn abbe_offset_shifts_the_match() {
    let glasses = vec![glass("low-v", 1.52, 40.0), glass("high-v", 1.52, 70.0)];
    let unshifted = closest_glass(&glasses, 1.52, 41.0, 0.0).unwrap();
    assert_eq!(unshifted.name, "low-v");
    let shifted = closest_glass(&glasses, 1.52, 41.0, 28.0).unwrap();
    assert_eq!(shifted.name, "high-v");
}

#[test]
fn degenerate_inputs_match_nothing() {
    let glasses = vec![glass("crown", 1.52, 64.0)];
    assert!(closest_glass(&glasses, 0.0, 64.0, 0.0).is_none());
    assert!(closest_glass(&glasses, 1.52, 0.0, 0.0).is_none());
    assert!(closest_glass(&[], 1.52, 64.0, 0.0).is_none());
}

// ============================================================================
// Library loading
// ============================================================================

#[test]
fn library_loads_sellmeier_records_and_skips_the_rest() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let vendor = dir.path().join("schott");
    std::fs::create_dir_all(&vendor)?;

    let mut bk7 = std::fs::File::create(vendor.join("N-BK7.yml"))?;
    writeln!(
        bk7,
        "SPECS:\n  nd: 1.5168\n  vd: 64.17\nDATA:\n  - type: \"formula 2\"\n    coefficients: \"0 1.03961212 0.00600069867 0.23179234 0.02001791 1.01046945 103.560653\""
    )?;

    let mut other = std::fs::File::create(vendor.join("tabulated.yml"))?;
    writeln!(other, "DATA:\n  - type: \"tabulated nk\"")?;

    std::fs::write(vendor.join("readme.txt"), "not a glass")?;

    let glasses = glasses_from_path(&vendor)?;
    assert_eq!(glasses.len(), 1);
    let bk7 = &glasses[0];
    assert_eq!(bk7.name, "N-BK7");
    assert_eq!(bk7.manufacturer, "schott");
    assert!((bk7.n - 1.5168).abs() < 1e-4);
    assert!((bk7.coefficients[0] - 1.039_612).abs() < 1e-5);
    Ok(())
}

#[test]
fn empty_path_yields_empty_library() {
    let glasses = glasses_from_path(std::path::Path::new("")).unwrap();
    assert!(glasses.is_empty());
}

#[test]
fn missing_directory_is_an_error() {
    assert!(glasses_from_path(std::path::Path::new("/nonexistent/glass")).is_err());
}
