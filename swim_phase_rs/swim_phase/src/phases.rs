//! Stroke-phase regions inside an analysis range.
//!
//! Crawl-style strokes (freestyle, backstroke, butterfly) are split into
//! Pull, Push and Recovery from shoulder/wrist intersections and wrist
//! exits from the water; the regions are stitched end-to-start at the end.
//! Breaststroke is split into Propulsion, Recovery and Glide from the wrist
//! sweep, the head dip and the arm extension; remaining gaps are filled
//! with Glide.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filters::{argmax, argmin, sign_changes, uniform_filter};
use crate::kicks::joint_angle;
use crate::records::BodyPart;
use crate::runs::{find_runs, Comparison, RunQuery};
use crate::series::{CleanedSeries, Column};
use crate::style::StrokeStyle;
use crate::{BreaststrokeParams, CrawlParams, FrameId, Interval, Leg, Params, SwimError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Pull,
    Push,
    Recovery,
    Propulsion,
    Glide,
}

impl PhaseKind {
    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Pull => "pull",
            PhaseKind::Push => "push",
            PhaseKind::Recovery => "recovery",
            PhaseKind::Propulsion => "propulsion",
            PhaseKind::Glide => "glide",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRegion {
    pub start: FrameId,
    pub end: FrameId,
    pub kind: PhaseKind,
}

impl PhaseRegion {
    pub fn new(start: FrameId, end: FrameId, kind: PhaseKind) -> Self {
        Self { start, end, kind }
    }

    pub fn duration_ms(&self, fps: f64) -> Option<f64> {
        (fps > 0.0).then(|| (self.end - self.start) as f64 / fps * 1000.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStrategy {
    Crawl,
    Breaststroke,
}

impl From<StrokeStyle> for PhaseStrategy {
    fn from(style: StrokeStyle) -> Self {
        match style {
            StrokeStyle::Breaststroke => PhaseStrategy::Breaststroke,
            _ => PhaseStrategy::Crawl,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimeline {
    pub leg: Leg,
    pub strategy: PhaseStrategy,
    /// First and last frame actually covered.
    pub range: Interval,
    pub regions: Vec<PhaseRegion>,
    /// One marker frame per counted stroke.
    pub stroke_frames: Vec<FrameId>,
    pub stroke_count: usize,
}

impl PhaseTimeline {
    /// Whether the regions cover `range` end to end with shared boundaries.
    pub fn is_contiguous(&self) -> bool {
        match (self.regions.first(), self.regions.last()) {
            (Some(first), Some(last)) => {
                first.start == self.range.start()
                    && last.end == self.range.end()
                    && self.regions.iter().all(|r| r.start <= r.end)
                    && self.regions.windows(2).all(|w| w[0].end == w[1].start)
            }
            _ => false,
        }
    }
}

/// Builds the phase timeline of one leg with the strategy matching `style`.
pub fn build_phases(
    series: &CleanedSeries,
    range: Interval,
    leg: Leg,
    style: StrokeStyle,
    waterline_y: f64,
    params: &Params,
) -> Result<PhaseTimeline, SwimError> {
    match PhaseStrategy::from(style) {
        PhaseStrategy::Crawl => build_crawl_phases(series, range, leg, waterline_y, &params.crawl),
        PhaseStrategy::Breaststroke => {
            build_breaststroke_phases(series, range, leg, &params.breaststroke)
        }
    }
}

fn range_rows(
    series: &CleanedSeries,
    range: Interval,
    leg: Leg,
) -> Result<std::ops::Range<usize>, SwimError> {
    let rows = series.rows_in(range);
    if rows.is_empty() {
        return Err(SwimError::InsufficientData(format!(
            "no frames in {leg} range {range}"
        )));
    }
    Ok(rows)
}

fn timeline(
    leg: Leg,
    strategy: PhaseStrategy,
    frames: &[FrameId],
    regions: Vec<PhaseRegion>,
    stroke_frames: Vec<FrameId>,
) -> Result<PhaseTimeline, SwimError> {
    let (first, last) = match (frames.first(), frames.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Err(SwimError::InsufficientData("empty phase range".into())),
    };
    debug!(
        %leg,
        regions = regions.len(),
        strokes = stroke_frames.len(),
        "phase timeline"
    );
    Ok(PhaseTimeline {
        leg,
        strategy,
        range: Interval::new(first, last)?,
        stroke_count: stroke_frames.len(),
        regions,
        stroke_frames,
    })
}

pub fn build_crawl_phases(
    series: &CleanedSeries,
    range: Interval,
    leg: Leg,
    waterline_y: f64,
    params: &CrawlParams,
) -> Result<PhaseTimeline, SwimError> {
    let rows = range_rows(series, range, leg)?;
    let axis = params.intersection_axis;
    let shoulder = series.values(Column::Keypoint(BodyPart::Shoulder, axis), rows.clone())?;
    let wrist = series.values(Column::Keypoint(BodyPart::Wrist, axis), rows.clone())?;
    let wrist_y = series.values(Column::y(BodyPart::Wrist), rows.clone())?;
    let frames = &series.frames()[rows];

    let regions = crawl_regions(frames, &shoulder, &wrist, &wrist_y, waterline_y, leg, params);
    let strokes = regions
        .iter()
        .filter(|r| r.kind == PhaseKind::Recovery)
        .map(|r| r.start)
        .collect();
    timeline(leg, PhaseStrategy::Crawl, frames, regions, strokes)
}

/// Crawl-style regions over one range.
///
/// Push starts are shoulder/wrist intersections confirmed by the next
/// `confirm_frames` samples (wrist ahead of the shoulder on the outbound
/// leg, behind it on the return leg). Recovery is the wrist above the
/// waterline; everything else is Pull. The final pass sorts all regions and
/// makes each one end where the next starts.
pub fn crawl_regions(
    frames: &[FrameId],
    shoulder: &[f64],
    wrist: &[f64],
    wrist_y: &[f64],
    waterline_y: f64,
    leg: Leg,
    params: &CrawlParams,
) -> Vec<PhaseRegion> {
    let n = frames.len();
    let (range_start, range_end) = match (frames.first(), frames.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Vec::new(),
    };
    let s = uniform_filter(shoulder, params.smooth_size);
    let w = uniform_filter(wrist, params.smooth_size);

    let crossings = sign_changes(&s, &w);
    if crossings.is_empty() {
        return vec![PhaseRegion::new(range_start, range_end, PhaseKind::Pull)];
    }

    let confirm = params.confirm_frames;
    let push_starts: Vec<FrameId> = crossings
        .iter()
        .filter(|&&i| i + confirm < n)
        .filter(|&&i| {
            (i + 1..=i + confirm).all(|j| match leg {
                Leg::Outbound => w[j] > s[j],
                Leg::Return => w[j] < s[j],
            })
        })
        .map(|&i| frames[i])
        .collect();

    let recovery: Vec<PhaseRegion> = find_runs(
        frames,
        wrist_y,
        &RunQuery {
            threshold: waterline_y,
            comparison: Comparison::Below,
            min_len: 1,
            top_n: None,
        },
    )
    .into_iter()
    .map(|iv| PhaseRegion::new(iv.start(), iv.end(), PhaseKind::Recovery))
    .collect();

    let mut push: Vec<PhaseRegion> = push_starts
        .iter()
        .map(|&start| {
            let end = recovery
                .iter()
                .find(|r| r.start > start)
                .map_or(range_end, |r| r.start - 1);
            PhaseRegion::new(start, end, PhaseKind::Push)
        })
        .collect();

    let claimed = |frame: FrameId| {
        recovery
            .iter()
            .chain(push.iter())
            .any(|r| r.start <= frame && frame <= r.end)
    };
    let mut pull = Vec::new();
    let mut open: Option<(FrameId, FrameId)> = None;
    for &frame in frames {
        if claimed(frame) {
            if let Some((start, end)) = open.take() {
                pull.push(PhaseRegion::new(start, end, PhaseKind::Pull));
            }
        } else {
            open = Some(open.map_or((frame, frame), |(start, _)| (start, frame)));
        }
    }
    if let Some((start, end)) = open {
        pull.push(PhaseRegion::new(start, end, PhaseKind::Pull));
    }

    // Arm movement before the first confirmed push is not a stroke yet.
    let mut recovery = recovery;
    if let Some(first_push) = push.first().map(|r| r.start) {
        for list in [&mut recovery, &mut push] {
            let (early, kept): (Vec<_>, Vec<_>) =
                list.drain(..).partition(|r| r.start < first_push);
            *list = kept;
            pull.extend(early.into_iter().map(|r| PhaseRegion {
                kind: PhaseKind::Pull,
                ..r
            }));
        }
    }

    // A pull ending right before a recovery is the push of that stroke.
    for rec in &recovery {
        if let Some(pos) = pull.iter().position(|p| p.end == rec.start - 1) {
            let p = pull.remove(pos);
            push.push(PhaseRegion {
                kind: PhaseKind::Push,
                ..p
            });
        }
    }

    let mut regions = merge_regions(pull);
    regions.extend(merge_regions(push));
    regions.extend(recovery);
    stitch_regions(regions, range_end)
}

/// Sorts same-kind regions and merges overlapping or adjacent ones.
pub fn merge_regions(mut regions: Vec<PhaseRegion>) -> Vec<PhaseRegion> {
    regions.sort_by_key(|r| r.start);
    let mut merged: Vec<PhaseRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(last) if region.start <= last.end + 1 => {
                last.end = last.end.max(region.end);
            }
            _ => merged.push(region),
        }
    }
    merged
}

/// Orders regions by start and makes every region end where the next one
/// starts; the last region ends at `range_end`.
pub fn stitch_regions(mut regions: Vec<PhaseRegion>, range_end: FrameId) -> Vec<PhaseRegion> {
    regions.sort_by_key(|r| r.start);
    let starts: Vec<FrameId> = regions.iter().skip(1).map(|r| r.start).collect();
    for (region, next_start) in regions.iter_mut().zip(starts) {
        region.end = next_start;
    }
    if let Some(last) = regions.last_mut() {
        last.end = range_end;
    }
    regions
}

pub fn build_breaststroke_phases(
    series: &CleanedSeries,
    range: Interval,
    leg: Leg,
    params: &BreaststrokeParams,
) -> Result<PhaseTimeline, SwimError> {
    let rows = range_rows(series, range, leg)?;
    let head_y = series.values(Column::y(BodyPart::Head), rows.clone())?;
    let wrist_x = series.values(Column::x(BodyPart::Wrist), rows.clone())?;
    let mut arm_angle = Vec::with_capacity(rows.len());
    for row in rows.clone() {
        let point = |part: BodyPart| -> Result<[f64; 2], SwimError> {
            Ok([
                series.value(Column::x(part), row)?,
                series.value(Column::y(part), row)?,
            ])
        };
        let angle = joint_angle(
            point(BodyPart::Shoulder)?,
            point(BodyPart::Elbow)?,
            point(BodyPart::Wrist)?,
        );
        arm_angle.push(angle.unwrap_or(f64::NAN));
    }
    let frames = &series.frames()[rows];

    let (regions, strokes) =
        breaststroke_regions(frames, &wrist_x, &arm_angle, &head_y, leg, params);
    timeline(leg, PhaseStrategy::Breaststroke, frames, regions, strokes)
}

/// Breaststroke regions over one range, plus the recovery-end frame of each
/// complete stroke cycle.
///
/// A cycle starts where the smoothed wrist-x velocity turns (negative to
/// positive outbound, positive to negative on the return leg), at least
/// `min_start_gap` frames after the previous start. Propulsion runs to the
/// lowest head position before the next start; recovery runs to the widest
/// shoulder-elbow-wrist angle shortly after. Whatever is left is Glide.
pub fn breaststroke_regions(
    frames: &[FrameId],
    wrist_x: &[f64],
    arm_angle: &[f64],
    head_y: &[f64],
    leg: Leg,
    params: &BreaststrokeParams,
) -> (Vec<PhaseRegion>, Vec<FrameId>) {
    let n = frames.len();
    let (range_start, range_end) = match (frames.first(), frames.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return (Vec::new(), Vec::new()),
    };
    let wx = uniform_filter(wrist_x, params.smooth_size);
    let angle = uniform_filter(arm_angle, params.smooth_size);
    let d: Vec<f64> = wx.windows(2).map(|p| p[1] - p[0]).collect();

    let turns_here = |before: f64, after: f64| match leg {
        Leg::Outbound => before < 0.0 && after > 0.0,
        Leg::Return => before > 0.0 && after < 0.0,
    };
    let mut candidates = Vec::new();
    if let Some(&d0) = d.first() {
        let already_moving = match leg {
            Leg::Outbound => d0 > 0.0,
            Leg::Return => d0 < 0.0,
        };
        if already_moving {
            candidates.push(1);
        }
    }
    candidates.extend((1..d.len()).filter(|&i| turns_here(d[i - 1], d[i])).map(|i| i + 1));

    let mut starts: Vec<usize> = Vec::new();
    for row in candidates {
        let far_enough = starts
            .last()
            .map_or(true, |&last| frames[row] - frames[last] >= params.min_start_gap);
        if far_enough {
            starts.push(row);
        }
    }

    // (propulsion start, propulsion end, recovery end) rows
    let mut cycles: Vec<(usize, usize, usize)> = Vec::new();
    for pair in starts.windows(2) {
        let (start, next) = (pair[0], pair[1]);
        let Some(dip) = argmin(&head_y[start..=next]) else {
            break;
        };
        let prop_end = start + dip;
        let window = prop_end + 1..(prop_end + 1 + params.recovery_window).min(n);
        if window.is_empty() {
            break;
        }
        let Some(peak) = argmax(&angle[window.clone()]) else {
            break;
        };
        let rec_end = (window.start + peak).min(next).max(prop_end);
        cycles.push((start, prop_end, rec_end));
    }

    if cycles.is_empty() {
        return (
            vec![PhaseRegion::new(range_start, range_end, PhaseKind::Glide)],
            Vec::new(),
        );
    }

    let mut regions = Vec::with_capacity(cycles.len() * 3 + 1);
    let first_start = frames[cycles[0].0];
    if first_start > range_start {
        regions.push(PhaseRegion::new(range_start, first_start, PhaseKind::Glide));
    }
    for (k, &(ps, pe, re)) in cycles.iter().enumerate() {
        regions.push(PhaseRegion::new(frames[ps], frames[pe], PhaseKind::Propulsion));
        regions.push(PhaseRegion::new(frames[pe], frames[re], PhaseKind::Recovery));
        if let Some(&(next_ps, _, _)) = cycles.get(k + 1) {
            if frames[next_ps] >= frames[re] {
                regions.push(PhaseRegion::new(frames[re], frames[next_ps], PhaseKind::Glide));
            }
        }
    }
    let last_rec = frames[cycles[cycles.len() - 1].2];
    if last_rec < range_end {
        regions.push(PhaseRegion::new(last_rec, range_end, PhaseKind::Glide));
    }

    let strokes = cycles.iter().map(|&(_, _, re)| frames[re]).collect();
    (regions, strokes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsmoothed_crawl() -> CrawlParams {
        CrawlParams {
            smooth_size: 1,
            ..CrawlParams::default()
        }
    }

    fn spans(regions: &[PhaseRegion]) -> Vec<(FrameId, FrameId, PhaseKind)> {
        regions.iter().map(|r| (r.start, r.end, r.kind)).collect()
    }

    #[test]
    fn test_crawl_without_crossings_is_all_pull() {
        let frames: Vec<FrameId> = (10..20).collect();
        let regions = crawl_regions(
            &frames,
            &[100.0; 10],
            &[90.0; 10],
            &[20.0; 10],
            50.0,
            Leg::Outbound,
            &CrawlParams::default(),
        );
        assert_eq!(spans(&regions), vec![(10, 19, PhaseKind::Pull)]);
    }

    #[test]
    fn test_crawl_outbound_cycle() {
        use PhaseKind::*;
        let frames: Vec<FrameId> = (0..30).collect();
        let shoulder = vec![100.0; 30];
        let wrist: Vec<f64> = (0..30)
            .map(|r| if (5..15).contains(&r) { 110.0 } else { 90.0 })
            .collect();
        let wrist_y: Vec<f64> = (0..30)
            .map(|r| {
                if (1..3).contains(&r) || (20..25).contains(&r) || (27..29).contains(&r) {
                    40.0
                } else {
                    80.0
                }
            })
            .collect();
        let regions = crawl_regions(
            &frames,
            &shoulder,
            &wrist,
            &wrist_y,
            50.0,
            Leg::Outbound,
            &unsmoothed_crawl(),
        );
        // the early recovery at 1..=2 predates the first push at 4 and folds
        // into pull; the pull at 25..=26 leads into the recovery at 27
        assert_eq!(
            spans(&regions),
            vec![
                (0, 4, Pull),
                (4, 20, Push),
                (20, 25, Recovery),
                (25, 27, Push),
                (27, 29, Recovery),
                (29, 29, Pull),
            ]
        );
    }

    #[test]
    fn test_crawl_return_requires_wrist_behind() {
        use PhaseKind::*;
        let frames: Vec<FrameId> = (0..30).collect();
        let shoulder = vec![100.0; 30];
        let wrist: Vec<f64> = (0..30)
            .map(|r| if (5..15).contains(&r) { 110.0 } else { 90.0 })
            .collect();
        let wrist_y: Vec<f64> = (0..30)
            .map(|r| if (20..25).contains(&r) { 40.0 } else { 80.0 })
            .collect();
        let regions = crawl_regions(
            &frames,
            &shoulder,
            &wrist,
            &wrist_y,
            50.0,
            Leg::Return,
            &unsmoothed_crawl(),
        );
        assert_eq!(
            spans(&regions),
            vec![(0, 14, Pull), (14, 20, Push), (20, 25, Recovery), (25, 29, Pull)]
        );
    }

    #[test]
    fn test_merge_adjacent_regions() {
        let merged = merge_regions(vec![
            PhaseRegion::new(5, 8, PhaseKind::Pull),
            PhaseRegion::new(0, 4, PhaseKind::Pull),
            PhaseRegion::new(10, 12, PhaseKind::Pull),
        ]);
        assert_eq!(
            spans(&merged),
            vec![(0, 8, PhaseKind::Pull), (10, 12, PhaseKind::Pull)]
        );
    }

    fn breaststroke_fixture() -> (Vec<FrameId>, Vec<f64>, Vec<f64>, Vec<f64>) {
        let frames: Vec<FrameId> = (0..100).collect();
        let wrist_x = (0..100)
            .map(|r: i64| {
                let d = [9i64, 49, 89].iter().map(|c| (r - c).abs()).min().unwrap_or(0);
                100.0 + d as f64
            })
            .collect();
        let head_y = (0..100)
            .map(|r: i64| {
                let c = if r < 50 { 30 } else { 70 };
                200.0 + (r - c).abs() as f64
            })
            .collect();
        let arm = (0..100)
            .map(|r: i64| {
                let c = if r < 60 { 40 } else { 80 };
                100.0 - (r - c).abs() as f64
            })
            .collect();
        (frames, wrist_x, arm, head_y)
    }

    #[test]
    fn test_breaststroke_cycles_and_glide_backfill() {
        use PhaseKind::*;
        let (frames, wrist_x, arm, head_y) = breaststroke_fixture();
        let params = BreaststrokeParams {
            smooth_size: 1,
            ..BreaststrokeParams::default()
        };
        let (regions, strokes) =
            breaststroke_regions(&frames, &wrist_x, &arm, &head_y, Leg::Outbound, &params);
        assert_eq!(
            spans(&regions),
            vec![
                (0, 10, Glide),
                (10, 30, Propulsion),
                (30, 40, Recovery),
                (40, 50, Glide),
                (50, 70, Propulsion),
                (70, 80, Recovery),
                (80, 99, Glide),
            ]
        );
        assert_eq!(strokes, vec![40, 80]);
    }

    #[test]
    fn test_breaststroke_return_leg_turns_on_wrist_peaks() {
        use PhaseKind::*;
        let (frames, wrist_x, arm, head_y) = breaststroke_fixture();
        let params = BreaststrokeParams {
            smooth_size: 1,
            ..BreaststrokeParams::default()
        };
        // the outbound valleys in wrist x are peaks when swimming back
        let mirrored: Vec<f64> = wrist_x.iter().map(|x| 300.0 - x).collect();
        let (regions, strokes) =
            breaststroke_regions(&frames, &mirrored, &arm, &head_y, Leg::Return, &params);
        assert_eq!(
            spans(&regions),
            vec![
                (0, 10, Glide),
                (10, 30, Propulsion),
                (30, 40, Recovery),
                (40, 50, Glide),
                (50, 70, Propulsion),
                (70, 80, Recovery),
                (80, 99, Glide),
            ]
        );
        assert_eq!(strokes, vec![40, 80]);

        // read as outbound, the cycles start on the valleys between the peaks
        let (regions, strokes) =
            breaststroke_regions(&frames, &mirrored, &arm, &head_y, Leg::Outbound, &params);
        assert_ne!(strokes, vec![40, 80]);
        assert_eq!(regions[0].start, 0);
        assert_eq!(regions[regions.len() - 1].end, 99);
    }

    #[test]
    fn test_breaststroke_first_frame_already_sweeping() {
        use PhaseKind::*;
        let (frames, _, arm, head_y) = breaststroke_fixture();
        // wrist x rises from the first frame: the opening cycle starts at row 1
        let wrist_x: Vec<f64> = (0..100)
            .map(|r: i64| {
                let d = [-1i64, 49, 89].iter().map(|c| (r - c).abs()).min().unwrap_or(0);
                100.0 + d as f64
            })
            .collect();
        let params = BreaststrokeParams {
            smooth_size: 1,
            ..BreaststrokeParams::default()
        };
        let (regions, strokes) =
            breaststroke_regions(&frames, &wrist_x, &arm, &head_y, Leg::Outbound, &params);
        assert_eq!(
            spans(&regions),
            vec![
                (0, 1, Glide),
                (1, 30, Propulsion),
                (30, 40, Recovery),
                (40, 50, Glide),
                (50, 70, Propulsion),
                (70, 80, Recovery),
                (80, 99, Glide),
            ]
        );
        assert_eq!(strokes, vec![40, 80]);
    }

    #[test]
    fn test_breaststroke_without_cycle_is_all_glide() {
        let frames: Vec<FrameId> = (0..50).collect();
        let wrist_x: Vec<f64> = (0..50).map(|r| r as f64).collect();
        let (regions, strokes) = breaststroke_regions(
            &frames,
            &wrist_x,
            &[90.0; 50],
            &[200.0; 50],
            Leg::Outbound,
            &BreaststrokeParams::default(),
        );
        assert_eq!(spans(&regions), vec![(0, 49, PhaseKind::Glide)]);
        assert!(strokes.is_empty());
    }

    #[test]
    fn test_duration_ms() {
        let region = PhaseRegion::new(30, 60, PhaseKind::Pull);
        assert_eq!(region.duration_ms(30.0), Some(1000.0));
        assert_eq!(region.duration_ms(0.0), None);
    }
}
