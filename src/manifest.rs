use serde_json::Value;

use crate::domain::RasterFormat;

pub const LEVEL0_PROFILE: &str = "http://iiif.io/api/image/2/level0.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub manifest: Value,
    /// False when the descriptor did not have the expected profile shape and
    /// was passed through untouched.
    pub applied: bool,
}

/// Pins the compliance level to level 0 and the advertised formats to `target`,
/// so the rasterizer requests tiles in one deterministic encoding.
///
/// Expects `profile: [<level uri>, {"formats": [...], ...}, ...]`.
pub fn force_encoding(descriptor: &Value, target: RasterFormat) -> Transformed {
    let mut manifest = descriptor.clone();
    let applied = match manifest.get_mut("profile").and_then(Value::as_array_mut) {
        Some(profile) if profile.len() >= 2 && has_formats(&profile[1]) => {
            profile[0] = Value::String(LEVEL0_PROFILE.to_string());
            profile[1]["formats"] = Value::Array(vec![Value::String(target.to_string())]);
            true
        }
        _ => false,
    };
    Transformed { manifest, applied }
}

fn has_formats(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|object| object.get("formats"))
        .map(Value::is_array)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rewrites_profile_and_formats() {
        let descriptor = json!({
            "@id": "https://example.org/iiif/2/abc",
            "width": 4000,
            "height": 3000,
            "profile": [
                "http://iiif.io/api/image/2/level2.json",
                {"formats": ["jpg", "png", "webp"], "qualities": ["default", "gray"]}
            ]
        });
        let transformed = force_encoding(&descriptor, RasterFormat::Jpg);
        assert!(transformed.applied);
        assert_eq!(transformed.manifest["profile"][0], LEVEL0_PROFILE);
        assert_eq!(transformed.manifest["profile"][1]["formats"], json!(["jpg"]));
        assert_eq!(
            transformed.manifest["profile"][1]["qualities"],
            json!(["default", "gray"])
        );
        assert_eq!(transformed.manifest["width"], 4000);
    }

    #[test]
    fn unexpected_shapes_pass_through() {
        let shapes = [
            json!({"width": 1, "height": 1}),
            json!({"profile": "http://iiif.io/api/image/2/level2.json"}),
            json!({"profile": ["http://iiif.io/api/image/2/level2.json"]}),
            json!({"profile": ["level2", {"qualities": ["default"]}]}),
            json!({"profile": ["level2", "not-a-map"]}),
        ];
        for shape in shapes {
            let transformed = force_encoding(&shape, RasterFormat::Jpg);
            assert!(!transformed.applied);
            assert_eq!(transformed.manifest, shape);
        }
    }
}
