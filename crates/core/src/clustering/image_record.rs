use serde::{Deserialize, Serialize};

use crate::detection::domain::face_detector::DetectedFace;

/// Cluster assignment for one detected face.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAssignment {
    pub group_id: String,
    pub similarity: f64,
}

/// Persisted result of processing one image: the detected faces and the
/// group each face was assigned to, in detection order.
///
/// Written once when an image is first processed, never updated — later
/// calls for the same filename return this record as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageFaceRecord {
    pub filename: String,
    pub faces: Vec<DetectedFace>,
    pub groups: Vec<GroupAssignment>,
}

/// Storage key for an image's face record.
///
/// Path separators are replaced so nested library paths map to flat,
/// filesystem-safe names under the `faces/` prefix.
pub fn record_key(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("faces/{safe}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::face_box::FaceBox;

    #[test]
    fn test_record_key_plain_filename() {
        assert_eq!(record_key("beach.jpg"), "faces/beach.jpg.json");
    }

    #[test]
    fn test_record_key_replaces_forward_slashes() {
        assert_eq!(
            record_key("2023/holiday/beach.jpg"),
            "faces/2023_holiday_beach.jpg.json"
        );
    }

    #[test]
    fn test_record_key_replaces_backslashes() {
        assert_eq!(record_key("2023\\beach.jpg"), "faces/2023_beach.jpg.json");
    }

    #[test]
    fn test_record_key_is_deterministic() {
        assert_eq!(record_key("a/b.png"), record_key("a/b.png"));
    }

    #[test]
    fn test_wire_format_field_names() {
        let record = ImageFaceRecord {
            filename: "beach.jpg".to_string(),
            faces: vec![DetectedFace {
                bounding_box: FaceBox {
                    x: 1.0,
                    y: 2.0,
                    width: 3.0,
                    height: 4.0,
                },
                embedding: vec![0.0, 1.0],
            }],
            groups: vec![GroupAssignment {
                group_id: "g1".to_string(),
                similarity: 0.85,
            }],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["filename"], "beach.jpg");
        assert!(json["faces"][0].get("box").is_some());
        assert!(json["faces"][0].get("embedding").is_some());
        assert_eq!(json["groups"][0]["groupId"], "g1");
        assert_eq!(json["groups"][0]["similarity"], 0.85);
    }

    #[test]
    fn test_wire_format_roundtrip() {
        let json = r#"{
            "filename": "a.jpg",
            "faces": [{"box": {"x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0},
                       "embedding": [1.0, 0.0]}],
            "groups": [{"groupId": "abc", "similarity": 1.0}]
        }"#;
        let record: ImageFaceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.faces.len(), record.groups.len());
        assert_eq!(record.groups[0].group_id, "abc");
    }
}
