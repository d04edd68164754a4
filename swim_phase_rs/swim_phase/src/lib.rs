//! Temporal segmentation and stroke-phase detection over per-frame swimmer
//! keypoint series.
//!
//! The crate turns raw pose-estimator output into race events: submersion
//! intervals, the wall-touch frame, stroke-phase regions, kick-angle extrema
//! and checkpoint split times. Every algorithm is a pure function over an
//! immutable [`CleanedSeries`]; [`analyze`] sequences them into a single
//! [`AnalysisReport`].

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod filters;
pub mod kicks;
pub mod phases;
pub mod records;
pub mod runs;
pub mod sequencer;
pub mod series;
pub mod splits;
pub mod style;

pub use kicks::{KickEvent, KickSummary};
pub use phases::{PhaseKind, PhaseRegion, PhaseTimeline};
pub use records::{parse_records, Axis, BodyPart, FrameRecord, ParsedRecords};
pub use runs::{find_runs, Comparison, RunQuery};
pub use sequencer::{analyze, AnalysisReport, AnalysisStatus, Stage, StageIssue, VideoContext};
pub use series::{clean_records, CleanedSeries, Column};
pub use splits::{Checkpoint, CheckpointLines, SplitResult};
pub use style::{StrokeClassifier, StrokeStyle};

/// Frame index as emitted by the pose estimator.
pub type FrameId = i64;

#[derive(Error, Debug)]
pub enum SwimError {
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("column {0} has no valid samples")]
    UnusableColumn(Column),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid interval: start {start} is after end {end}")]
    InvalidInterval { start: FrameId, end: FrameId },
    #[error("stroke classifier failed: {0}")]
    Classifier(String),
}

/// Closed frame interval `[start, end]` with `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub struct Interval {
    start: FrameId,
    end: FrameId,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct IntervalRepr {
    start: FrameId,
    end: FrameId,
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = SwimError;

    fn try_from(value: IntervalRepr) -> Result<Self, Self::Error> {
        Interval::new(value.start, value.end)
    }
}

impl From<Interval> for IntervalRepr {
    fn from(value: Interval) -> Self {
        IntervalRepr {
            start: value.start,
            end: value.end,
        }
    }
}

impl Interval {
    pub fn new(start: FrameId, end: FrameId) -> Result<Self, SwimError> {
        if start > end {
            return Err(SwimError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> FrameId {
        self.start
    }

    pub fn end(&self) -> FrameId {
        self.end
    }

    /// `end - start`, the ranking key used by the run segmenter.
    pub fn span(&self) -> FrameId {
        self.end - self.start
    }

    pub fn contains(&self, frame: FrameId) -> bool {
        frame >= self.start && frame <= self.end
    }

    /// Returns a new interval starting at `start`, keeping this end.
    pub fn with_start(&self, start: FrameId) -> Result<Self, SwimError> {
        Interval::new(start, self.end)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Analysis range name. Outbound runs from the end of the dive glide to the
/// turn; return runs from the end of the turn glide to the wall touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Outbound,
    Return,
}

impl Leg {
    pub const ALL: [Leg; 2] = [Leg::Outbound, Leg::Return];

    pub fn name(self) -> &'static str {
        match self {
            Leg::Outbound => "outbound",
            Leg::Return => "return",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const DEFAULT_OUTLIER_FLOOR_PX: f64 = 10.0;
pub const DEFAULT_OUTLIER_MAX_JUMP_PX: f64 = 50.0;
pub const DEFAULT_SMOOTHING_WINDOW: usize = 7;
pub const DEFAULT_MIN_SUBMERSION_FRAMES: usize = 10;
pub const DEFAULT_SUBMERSION_SEGMENTS: usize = 2;
pub const DEFAULT_WALL_MARGIN_PX: f64 = 40.0;
pub const DEFAULT_TAIL_FALLBACK_FRAMES: FrameId = 5;
pub const DEFAULT_KICK_EXTREMA_ORDER: usize = 30;
pub const DEFAULT_KICK_MAX_ANGLE_DEG: f64 = 140.0;
pub const DEFAULT_KICK_ANKLE_X_LIMIT_PX: f64 = 3790.0;
pub const DEFAULT_CRAWL_SMOOTH_SIZE: usize = 10;
pub const DEFAULT_CRAWL_CONFIRM_FRAMES: usize = 3;
pub const DEFAULT_BREAST_SMOOTH_SIZE: usize = 5;
pub const DEFAULT_BREAST_MIN_START_GAP: FrameId = 30;
pub const DEFAULT_BREAST_RECOVERY_WINDOW: usize = 15;
pub const DEFAULT_NEAR_LINE_FRACTION: f64 = 0.4;
pub const DEFAULT_MID_LINE_FRACTION: f64 = 0.05;
pub const DEFAULT_FAR_LINE_MARGIN_PX: f64 = 60.0;
pub const DEFAULT_TURN_BACK_RATIO: f64 = 0.95;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanParams {
    /// Keypoint coordinates below this are treated as missing.
    pub floor_px: f64,
    /// Largest frame-to-frame jump accepted for a keypoint coordinate.
    pub max_jump_px: f64,
    pub smoothing_window: usize,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            floor_px: DEFAULT_OUTLIER_FLOOR_PX,
            max_jump_px: DEFAULT_OUTLIER_MAX_JUMP_PX,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubmersionParams {
    pub min_run_frames: usize,
    pub segments: usize,
}

impl Default for SubmersionParams {
    fn default() -> Self {
        Self {
            min_run_frames: DEFAULT_MIN_SUBMERSION_FRAMES,
            segments: DEFAULT_SUBMERSION_SEGMENTS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TouchParams {
    /// Distance from the right frame edge that counts as touching the wall.
    pub wall_margin_px: f64,
    /// Frames trimmed from the end of the video when no touch is seen.
    pub tail_fallback_frames: FrameId,
}

impl Default for TouchParams {
    fn default() -> Self {
        Self {
            wall_margin_px: DEFAULT_WALL_MARGIN_PX,
            tail_fallback_frames: DEFAULT_TAIL_FALLBACK_FRAMES,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KickParams {
    /// Neighbours on each side a minimum must beat.
    pub extrema_order: usize,
    pub max_angle_deg: f64,
    /// Dive start is advanced to the first frame whose ankle x is below this.
    pub ankle_x_limit_px: Option<f64>,
}

impl Default for KickParams {
    fn default() -> Self {
        Self {
            extrema_order: DEFAULT_KICK_EXTREMA_ORDER,
            max_angle_deg: DEFAULT_KICK_MAX_ANGLE_DEG,
            ankle_x_limit_px: Some(DEFAULT_KICK_ANKLE_X_LIMIT_PX),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrawlParams {
    pub smooth_size: usize,
    /// Samples after an intersection that must confirm the push direction.
    pub confirm_frames: usize,
    /// Coordinate of the shoulder and wrist curves compared for intersections.
    pub intersection_axis: Axis,
}

impl Default for CrawlParams {
    fn default() -> Self {
        Self {
            smooth_size: DEFAULT_CRAWL_SMOOTH_SIZE,
            confirm_frames: DEFAULT_CRAWL_CONFIRM_FRAMES,
            intersection_axis: Axis::X,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreaststrokeParams {
    pub smooth_size: usize,
    pub min_start_gap: FrameId,
    /// Samples after a propulsion end searched for the recovery end.
    pub recovery_window: usize,
}

impl Default for BreaststrokeParams {
    fn default() -> Self {
        Self {
            smooth_size: DEFAULT_BREAST_SMOOTH_SIZE,
            min_start_gap: DEFAULT_BREAST_MIN_START_GAP,
            recovery_window: DEFAULT_BREAST_RECOVERY_WINDOW,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointParams {
    pub near_fraction: f64,
    pub mid_fraction: f64,
    pub far_margin_px: f64,
    /// Fraction of the far line the bbox must reach after mid to count as turned.
    pub turn_back_ratio: f64,
}

impl Default for CheckpointParams {
    fn default() -> Self {
        Self {
            near_fraction: DEFAULT_NEAR_LINE_FRACTION,
            mid_fraction: DEFAULT_MID_LINE_FRACTION,
            far_margin_px: DEFAULT_FAR_LINE_MARGIN_PX,
            turn_back_ratio: DEFAULT_TURN_BACK_RATIO,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub cleaning: CleanParams,
    pub submersion: SubmersionParams,
    pub touch: TouchParams,
    pub kicks: KickParams,
    pub crawl: CrawlParams,
    pub breaststroke: BreaststrokeParams,
    pub checkpoints: CheckpointParams,
    /// Skips the classifier when set.
    pub style_override: Option<StrokeStyle>,
}

impl Params {
    pub fn validate(&self) -> Result<(), SwimError> {
        if self.cleaning.smoothing_window == 0 {
            return Err(SwimError::InvalidParameter(
                "cleaning.smoothing_window must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("cleaning.floor_px", self.cleaning.floor_px),
            ("touch.wall_margin_px", self.touch.wall_margin_px),
            ("checkpoints.far_margin_px", self.checkpoints.far_margin_px),
        ] {
            if !(value >= 0.0) {
                return Err(SwimError::InvalidParameter(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }
        if self.breaststroke.min_start_gap < 0 || self.touch.tail_fallback_frames < 0 {
            return Err(SwimError::InvalidParameter(
                "breaststroke.min_start_gap and touch.tail_fallback_frames must not be negative"
                    .into(),
            ));
        }
        if !(self.cleaning.max_jump_px > 0.0) {
            return Err(SwimError::InvalidParameter(
                "cleaning.max_jump_px must be positive".into(),
            ));
        }
        if self.submersion.min_run_frames == 0 || self.submersion.segments == 0 {
            return Err(SwimError::InvalidParameter(
                "submersion.min_run_frames and submersion.segments must be at least 1".into(),
            ));
        }
        if self.kicks.extrema_order == 0 {
            return Err(SwimError::InvalidParameter(
                "kicks.extrema_order must be at least 1".into(),
            ));
        }
        if !(0.0..=180.0).contains(&self.kicks.max_angle_deg) {
            return Err(SwimError::InvalidParameter(format!(
                "kicks.max_angle_deg {} outside [0, 180]",
                self.kicks.max_angle_deg
            )));
        }
        if self.crawl.smooth_size == 0 || self.breaststroke.smooth_size == 0 {
            return Err(SwimError::InvalidParameter(
                "smoothing sizes must be at least 1".into(),
            ));
        }
        if self.crawl.confirm_frames == 0 || self.breaststroke.recovery_window == 0 {
            return Err(SwimError::InvalidParameter(
                "crawl.confirm_frames and breaststroke.recovery_window must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.checkpoints.turn_back_ratio) {
            return Err(SwimError::InvalidParameter(
                "checkpoints.turn_back_ratio must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// SHA-256 of the serialized params, stamped on every report.
    pub fn params_hash_sha256(&self) -> Result<String, SwimError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| SwimError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
