//! Checkpoint split times.
//!
//! The swimmer travels right-to-left on the outbound leg, so the near and
//! mid checkpoints fire when the tracked x position drops to their line.
//! The far checkpoint is the wall the swimmer returns to; it only counts
//! after the bbox has come back close to it following the mid crossing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::records::BodyPart;
use crate::series::{CleanedSeries, Column};
use crate::{CheckpointParams, FrameId, SwimError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Checkpoint {
    #[serde(rename = "15m")]
    Near,
    #[serde(rename = "25m")]
    Mid,
    #[serde(rename = "50m")]
    Far,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 3] = [Checkpoint::Near, Checkpoint::Mid, Checkpoint::Far];

    pub fn distance_m(self) -> f64 {
        match self {
            Checkpoint::Near => 15.0,
            Checkpoint::Mid => 25.0,
            Checkpoint::Far => 50.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Checkpoint::Near => "15m",
            Checkpoint::Mid => "25m",
            Checkpoint::Far => "50m",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Calibration x positions of the three checkpoint lines, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointLines {
    pub near_x: f64,
    pub mid_x: f64,
    pub far_x: f64,
}

impl CheckpointLines {
    pub fn from_frame_width(width: f64, params: &CheckpointParams) -> Self {
        Self {
            near_x: width * params.near_fraction,
            mid_x: width * params.mid_fraction,
            far_x: width - params.far_margin_px,
        }
    }
}

/// Positions read from one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossingSample {
    pub wrist_x: f64,
    pub bbox_left: f64,
    pub bbox_right: f64,
}

/// Incremental crossing state machine. Each checkpoint fires at most once;
/// the far checkpoint is gated on the turn-back flag and ends the scan.
#[derive(Clone, Debug)]
pub struct CrossingDetector {
    lines: CheckpointLines,
    turn_back_ratio: f64,
    passed: BTreeMap<Checkpoint, FrameId>,
    turned_back: bool,
}

impl CrossingDetector {
    pub fn new(lines: CheckpointLines, turn_back_ratio: f64) -> Self {
        Self {
            lines,
            turn_back_ratio,
            passed: BTreeMap::new(),
            turned_back: false,
        }
    }

    pub fn turned_back(&self) -> bool {
        self.turned_back
    }

    pub fn is_finished(&self) -> bool {
        self.passed.contains_key(&Checkpoint::Far)
    }

    pub fn passed(&self, checkpoint: Checkpoint) -> Option<FrameId> {
        self.passed.get(&checkpoint).copied()
    }

    /// Feeds one frame and returns the checkpoints it fired.
    pub fn update(&mut self, frame: FrameId, sample: CrossingSample) -> Vec<Checkpoint> {
        let mut fired = Vec::new();
        if self.is_finished() {
            return fired;
        }
        if !self.passed.contains_key(&Checkpoint::Near) && sample.wrist_x <= self.lines.near_x {
            self.passed.insert(Checkpoint::Near, frame);
            fired.push(Checkpoint::Near);
        }
        if !self.passed.contains_key(&Checkpoint::Mid) && sample.bbox_left <= self.lines.mid_x {
            self.passed.insert(Checkpoint::Mid, frame);
            fired.push(Checkpoint::Mid);
        }
        if self.passed.contains_key(&Checkpoint::Mid)
            && !self.turned_back
            && sample.bbox_right >= self.turn_back_ratio * self.lines.far_x
        {
            self.turned_back = true;
            debug!(frame, "swimmer turned back towards the far wall");
        }
        if self.turned_back && sample.bbox_right >= self.lines.far_x {
            self.passed.insert(Checkpoint::Far, frame);
            fired.push(Checkpoint::Far);
        }
        fired
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpeed {
    pub from_m: f64,
    pub to_m: f64,
    pub seconds: f64,
    pub speed_mps: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitResult {
    pub start_frame: FrameId,
    pub fps: f64,
    pub lines: CheckpointLines,
    pub passed: BTreeMap<Checkpoint, Option<FrameId>>,
    /// Seconds from the start frame to each fired checkpoint.
    pub elapsed_s: BTreeMap<Checkpoint, f64>,
    pub turned_back: bool,
    pub final_time_s: Option<f64>,
    pub segment_speeds: Vec<SegmentSpeed>,
    pub average_speed_mps: Option<f64>,
}

impl SplitResult {
    pub fn frame(&self, checkpoint: Checkpoint) -> Option<FrameId> {
        self.passed.get(&checkpoint).copied().flatten()
    }
}

/// Runs the crossing detector over every frame from `start_frame` on.
pub fn detect_splits(
    series: &CleanedSeries,
    start_frame: FrameId,
    fps: f64,
    lines: CheckpointLines,
    turn_back_ratio: f64,
) -> Result<SplitResult, SwimError> {
    if !(fps > 0.0) {
        return Err(SwimError::InvalidParameter(format!(
            "fps must be positive, got {fps}"
        )));
    }
    let wrist_x = series.column(Column::x(BodyPart::Wrist))?;
    let cx = series.column(Column::BboxCx)?;
    let width = series.column(Column::BboxWidth)?;

    let mut detector = CrossingDetector::new(lines, turn_back_ratio);
    for row in series.rows_from(start_frame) {
        let half = width[row] / 2.0;
        let sample = CrossingSample {
            wrist_x: wrist_x[row],
            bbox_left: cx[row] - half,
            bbox_right: cx[row] + half,
        };
        detector.update(series.frames()[row], sample);
        if detector.is_finished() {
            break;
        }
    }

    let elapsed = |frame: FrameId| (frame - start_frame) as f64 / fps;
    let passed: BTreeMap<Checkpoint, Option<FrameId>> = Checkpoint::ALL
        .into_iter()
        .map(|cp| (cp, detector.passed(cp)))
        .collect();
    let elapsed_s: BTreeMap<Checkpoint, f64> = passed
        .iter()
        .filter_map(|(&cp, frame)| frame.map(|f| (cp, elapsed(f))))
        .collect();
    let final_time_s = elapsed_s.get(&Checkpoint::Far).copied();

    let mut segment_speeds = Vec::new();
    let (mut prev_m, mut prev_s) = (0.0, 0.0);
    for cp in Checkpoint::ALL {
        let Some(&t) = elapsed_s.get(&cp) else {
            continue;
        };
        let seconds = t - prev_s;
        if seconds > 0.0 {
            segment_speeds.push(SegmentSpeed {
                from_m: prev_m,
                to_m: cp.distance_m(),
                seconds,
                speed_mps: (cp.distance_m() - prev_m) / seconds,
            });
        }
        prev_m = cp.distance_m();
        prev_s = t;
    }
    let average_speed_mps = final_time_s
        .filter(|&t| t > 0.0)
        .map(|t| Checkpoint::Far.distance_m() / t);

    info!(
        start_frame,
        turned_back = detector.turned_back(),
        final_time_s = ?final_time_s,
        "split detection finished"
    );
    Ok(SplitResult {
        start_frame,
        fps,
        lines,
        passed,
        elapsed_s,
        turned_back: detector.turned_back(),
        final_time_s,
        segment_speeds,
        average_speed_mps,
    })
}
