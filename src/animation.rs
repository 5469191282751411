//! Animation Documents
//!
//! An animation file has the same shape as a project but any leaf may be
//! a list; frame *i* selects the *i*-th entry, falling back to the last
//! entry of shorter lists. Fields that are lists in the project schema
//! itself (positions, resolutions, coating tables) animate as
//! lists-of-lists.

use serde_json::Value;

use crate::data::Project;
use crate::errors::Result;

/// Project fields whose values are JSON arrays in the static schema.
const ARRAY_FIELDS: [&str; 6] = [
    "position",
    "sensor_size",
    "coating_lens_elements",
    "scale",
    "vignetting",
    "resolution",
];

fn is_array_field(key: &str) -> bool {
    ARRAY_FIELDS.contains(&key)
}

/// Whether an array node is an animation track rather than a literal
/// value for its field.
fn is_track(key: Option<&str>, values: &[Value]) -> bool {
    match key {
        Some(key) if is_array_field(key) => {
            !values.is_empty() && values.iter().all(Value::is_array)
        }
        _ => true,
    }
}

fn resolve(value: &Value, key: Option<&str>, frame: usize) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, Some(k), frame)))
                .collect(),
        ),
        Value::Array(values) if is_track(key, values) => {
            let index = frame.min(values.len().saturating_sub(1));
            values.get(index).cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn track_lengths(value: &Value, key: Option<&str>, lengths: &mut Vec<usize>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                track_lengths(v, Some(k), lengths);
            }
        }
        Value::Array(values) if is_track(key, values) => lengths.push(values.len()),
        _ => {}
    }
}

/// The number of frames an animation document describes; scalars apply to
/// all frames, so a document with no tracks has one frame.
#[must_use]
pub fn frame_count(doc: &Value) -> usize {
    let mut lengths = Vec::new();
    track_lengths(doc, None, &mut lengths);
    lengths.into_iter().max().unwrap_or(1).max(1)
}

/// Resolves one frame of an animation document into a project.
pub fn project_for_frame(doc: &Value, frame: usize) -> Result<Project> {
    let resolved = resolve(doc, None, frame);
    Project::from_json(&resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_apply_to_all_frames() {
        let doc = json!({
            "flare": { "light": { "intensity": 2.0 } }
        });
        assert_eq!(frame_count(&doc), 1);
        let project = project_for_frame(&doc, 5).unwrap();
        assert_eq!(project.flare.light.intensity, 2.0);
    }

    #[test]
    fn scalar_tracks_select_per_frame_and_repeat_last() {
        let doc = json!({
            "flare": { "light": { "intensity": [1.0, 2.0, 3.0] } }
        });
        assert_eq!(frame_count(&doc), 3);
        assert_eq!(project_for_frame(&doc, 1).unwrap().flare.light.intensity, 2.0);
        // shorter than the frame range: the last entry repeats
        assert_eq!(project_for_frame(&doc, 9).unwrap().flare.light.intensity, 3.0);
    }

    #[test]
    fn array_valued_fields_animate_as_nested_lists() {
        let doc = json!({
            "flare": { "light": { "position": [[-0.5, 0.0], [0.5, 0.0]] } }
        });
        assert_eq!(frame_count(&doc), 2);
        assert_eq!(
            project_for_frame(&doc, 0).unwrap().flare.light.position,
            [-0.5, 0.0]
        );
        assert_eq!(
            project_for_frame(&doc, 1).unwrap().flare.light.position,
            [0.5, 0.0]
        );
    }

    #[test]
    fn literal_array_fields_stay_untouched() {
        let doc = json!({
            "flare": { "light": { "position": [0.25, -0.25] } }
        });
        assert_eq!(frame_count(&doc), 1);
        assert_eq!(
            project_for_frame(&doc, 3).unwrap().flare.light.position,
            [0.25, -0.25]
        );
    }
}
