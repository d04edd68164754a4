//! Per-frame pose records and the keypoint text format.
//!
//! One line per frame, whitespace separated:
//! `frame class cx cy w h conf` followed by `x y conf` for each of the seven
//! tracked body parts, or `frame no detection` when the detector saw nobody.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{FrameId, SwimError};

const BBOX_FIELDS: usize = 7;
const KEYPOINT_FIELDS: usize = 3;
pub const RECORD_FIELDS: usize = BBOX_FIELDS + BodyPart::COUNT * KEYPOINT_FIELDS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyPart {
    Head,
    Shoulder,
    Elbow,
    Wrist,
    Hip,
    Knee,
    Ankle,
}

impl BodyPart {
    pub const COUNT: usize = 7;
    pub const ALL: [BodyPart; BodyPart::COUNT] = [
        BodyPart::Head,
        BodyPart::Shoulder,
        BodyPart::Elbow,
        BodyPart::Wrist,
        BodyPart::Hip,
        BodyPart::Knee,
        BodyPart::Ankle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            BodyPart::Head => "head",
            BodyPart::Shoulder => "shoulder",
            BodyPart::Elbow => "elbow",
            BodyPart::Wrist => "wrist",
            BodyPart::Hip => "hip",
            BodyPart::Knee => "knee",
            BodyPart::Ankle => "ankle",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => f.write_str("x"),
            Axis::Y => f.write_str("y"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
}

impl Keypoint {
    pub fn coord(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

/// Detector box, stored by center.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
}

impl BoundingBox {
    pub fn left(&self) -> f64 {
        self.cx - self.width / 2.0
    }

    pub fn right(&self) -> f64 {
        self.cx + self.width / 2.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub bbox: BoundingBox,
    pub keypoints: [Keypoint; BodyPart::COUNT],
}

impl Detection {
    pub fn keypoint(&self, part: BodyPart) -> &Keypoint {
        &self.keypoints[part.index()]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_id: FrameId,
    /// `None` for frames the detector marked as "no detection".
    pub detection: Option<Detection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecords {
    pub records: Vec<FrameRecord>,
    pub no_detection_frames: usize,
    pub skipped: Vec<SkippedLine>,
}

/// Parses a whole keypoint file. Lines that break the format, or whose frame
/// id does not increase, are skipped and reported rather than failing the
/// file.
pub fn parse_records(text: &str) -> ParsedRecords {
    let mut parsed = ParsedRecords::default();
    let mut last_frame: Option<FrameId> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        match parse_line(raw, line_no) {
            Ok(record) => {
                if let Some(prev) = last_frame {
                    if record.frame_id <= prev {
                        let reason = format!(
                            "frame id {} does not follow {}",
                            record.frame_id, prev
                        );
                        warn!(line = line_no, "skipping record: {}", reason);
                        parsed.skipped.push(SkippedLine {
                            line: line_no,
                            reason,
                        });
                        continue;
                    }
                }
                last_frame = Some(record.frame_id);
                if record.detection.is_none() {
                    parsed.no_detection_frames += 1;
                }
                parsed.records.push(record);
            }
            Err(SwimError::MalformedRecord { line, reason }) => {
                warn!(line, "skipping record: {}", reason);
                parsed.skipped.push(SkippedLine { line, reason });
            }
            Err(other) => {
                warn!(line = line_no, "skipping record: {}", other);
                parsed.skipped.push(SkippedLine {
                    line: line_no,
                    reason: other.to_string(),
                });
            }
        }
    }

    debug!(
        records = parsed.records.len(),
        no_detection = parsed.no_detection_frames,
        skipped = parsed.skipped.len(),
        "parsed keypoint text"
    );
    parsed
}

pub fn parse_line(line: &str, line_no: usize) -> Result<FrameRecord, SwimError> {
    let malformed = |reason: String| SwimError::MalformedRecord {
        line: line_no,
        reason,
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    let first = fields
        .first()
        .ok_or_else(|| malformed("empty line".into()))?;
    let frame_id = parse_frame_id(first).ok_or_else(|| malformed(format!("bad frame id {first:?}")))?;

    if fields.len() == 3
        && fields[1].eq_ignore_ascii_case("no")
        && fields[2].eq_ignore_ascii_case("detection")
    {
        return Ok(FrameRecord {
            frame_id,
            detection: None,
        });
    }

    if fields.len() != RECORD_FIELDS {
        return Err(malformed(format!(
            "expected {} fields, found {}",
            RECORD_FIELDS,
            fields.len()
        )));
    }

    let mut values = [0.0f64; RECORD_FIELDS];
    for (i, token) in fields.iter().enumerate().skip(1) {
        values[i] = token
            .parse::<f64>()
            .map_err(|_| malformed(format!("field {} is not numeric: {token:?}", i)))?;
    }

    let class_id = values[1];
    if class_id < 0.0 || class_id.fract() != 0.0 {
        return Err(malformed(format!("bad class id {class_id}")));
    }

    let bbox = BoundingBox {
        cx: values[2],
        cy: values[3],
        width: values[4],
        height: values[5],
        confidence: values[6],
    };
    let mut keypoints = [Keypoint {
        x: f64::NAN,
        y: f64::NAN,
        confidence: 0.0,
    }; BodyPart::COUNT];
    for part in BodyPart::ALL {
        let base = BBOX_FIELDS + part.index() * KEYPOINT_FIELDS;
        keypoints[part.index()] = Keypoint {
            x: values[base],
            y: values[base + 1],
            confidence: values[base + 2],
        };
    }

    Ok(FrameRecord {
        frame_id,
        detection: Some(Detection {
            class_id: class_id as u32,
            bbox,
            keypoints,
        }),
    })
}

fn parse_frame_id(token: &str) -> Option<FrameId> {
    if let Ok(id) = token.parse::<FrameId>() {
        return (id >= 0).then_some(id);
    }
    let value = token.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Some(value as FrameId)
    } else {
        None
    }
}
