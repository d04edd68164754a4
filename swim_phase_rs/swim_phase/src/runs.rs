//! Threshold runs over a single column: submersions, above-water recoveries
//! and the wall touch.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::records::BodyPart;
use crate::series::{CleanedSeries, Column};
use crate::{FrameId, Interval, SubmersionParams, SwimError, TouchParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    /// `value >= threshold`
    AtLeast,
    /// `value < threshold`
    Below,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::AtLeast => value >= threshold,
            Comparison::Below => value < threshold,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunQuery {
    pub threshold: f64,
    pub comparison: Comparison,
    /// Minimum number of frames in a run.
    pub min_len: usize,
    /// Keep only the longest `n` runs.
    pub top_n: Option<usize>,
}

/// Maximal runs of consecutive samples satisfying the query's predicate.
///
/// Runs shorter than `min_len` samples are dropped. With `top_n` set, runs
/// are ranked by `end - start` (ties keep chronological order) and the
/// longest are kept. The result is always sorted by start frame. No
/// qualifying run yields an empty list.
pub fn find_runs(frames: &[FrameId], values: &[f64], query: &RunQuery) -> Vec<Interval> {
    let mut runs = Vec::new();
    let mut open: Option<(FrameId, FrameId, usize)> = None;

    for (&frame, &value) in frames.iter().zip(values) {
        if query.comparison.holds(value, query.threshold) {
            open = match open {
                Some((start, _, len)) => Some((start, frame, len + 1)),
                None => Some((frame, frame, 1)),
            };
        } else if let Some(run) = open.take() {
            push_run(&mut runs, run, query.min_len);
        }
    }
    if let Some(run) = open {
        push_run(&mut runs, run, query.min_len);
    }

    if let Some(n) = query.top_n {
        runs.sort_by_key(|iv: &Interval| Reverse(iv.span()));
        runs.truncate(n);
        runs.sort_by_key(|iv| iv.start());
    }
    runs
}

fn push_run(runs: &mut Vec<Interval>, (start, end, len): (FrameId, FrameId, usize), min_len: usize) {
    if len < min_len {
        return;
    }
    if let Ok(iv) = Interval::new(start, end) {
        runs.push(iv);
    }
}

/// Submersion intervals: the longest runs with the head at or below the
/// waterline (image y grows downwards).
pub fn find_submersions(
    series: &CleanedSeries,
    waterline_y: f64,
    params: &SubmersionParams,
) -> Result<Vec<Interval>, SwimError> {
    let head_y = series.column(Column::y(BodyPart::Head))?;
    let values = head_y.to_vec();
    let segments = find_runs(
        series.frames(),
        &values,
        &RunQuery {
            threshold: waterline_y,
            comparison: Comparison::AtLeast,
            min_len: params.min_run_frames,
            top_n: Some(params.segments),
        },
    );
    debug!(count = segments.len(), waterline_y, "submersion runs");
    Ok(segments)
}

/// First frame in the second half of the video where the bbox right edge
/// is within `wall_margin_px` of the right frame edge.
pub fn find_touch_frame(
    series: &CleanedSeries,
    video_width: f64,
    params: &TouchParams,
) -> Result<Option<FrameId>, SwimError> {
    let Some(max_frame) = series.last_frame() else {
        return Ok(None);
    };
    let cx = series.column(Column::BboxCx)?;
    let width = series.column(Column::BboxWidth)?;
    let half = max_frame.div_euclid(2);
    let limit = video_width - params.wall_margin_px;

    Ok(series
        .frames()
        .iter()
        .enumerate()
        .skip_while(|&(_, &f)| f < half)
        .find(|&(i, _)| cx[i] + width[i] / 2.0 > limit)
        .map(|(_, &f)| f))
}

/// Last frame of the return leg: the touch frame, or a fixed number of
/// frames before the end of the video when no touch was seen.
pub fn analysis_end_frame(
    touch_frame: Option<FrameId>,
    frame_count: Option<i64>,
    series: &CleanedSeries,
    params: &TouchParams,
) -> Option<FrameId> {
    if touch_frame.is_some() {
        return touch_frame;
    }
    match frame_count {
        Some(count) if count > 0 => Some(count - params.tail_fallback_frames),
        _ => series
            .last_frame()
            .map(|last| last - params.tail_fallback_frames),
    }
}
