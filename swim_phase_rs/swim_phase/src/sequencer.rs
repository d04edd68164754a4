//! End-to-end analysis of one video.
//!
//! Stages run in a fixed order. Losing the records or the waterline fails the
//! whole report; missing submersions stop the run with an insufficient-data
//! report; any later stage that cannot run is recorded as an issue and the
//! rest of the report is still filled in.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::kicks::{find_kicks, mean_signed_kick_angle, refine_dive_start, KickSummary};
use crate::phases::{build_phases, PhaseTimeline};
use crate::records::FrameRecord;
use crate::runs::{analysis_end_frame, find_submersions, find_touch_frame};
use crate::series::{clean_records, CleanedSeries};
use crate::splits::{detect_splits, CheckpointLines, SplitResult};
use crate::style::{classify_style, StrokeClassifier, StyleDecision};
use crate::{FrameId, Interval, Leg, Params, SwimError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clean,
    WaterlineKnown,
    SegmentsFound,
    TouchFrameKnown,
    StyleKnown,
    PhasesBuilt,
    TimingKnown,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Clean => "clean",
            Stage::WaterlineKnown => "waterline_known",
            Stage::SegmentsFound => "segments_found",
            Stage::TouchFrameKnown => "touch_frame_known",
            Stage::StyleKnown => "style_known",
            Stage::PhasesBuilt => "phases_built",
            Stage::TimingKnown => "timing_known",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Complete,
    /// Some stage could not run; see `issues`.
    Partial,
    /// Nothing was analyzed; see `failure_reason`.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageIssue {
    pub stage: Stage,
    pub reason: String,
}

/// Facts about the video supplied from outside the keypoint stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoContext {
    pub width_px: f64,
    pub fps: f64,
    pub frame_count: Option<i64>,
    /// Pixel row of the water surface; `None` when detection failed.
    pub waterline_y: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeSummary {
    pub per_leg: BTreeMap<Leg, usize>,
    pub stroke_frames: BTreeMap<Leg, Vec<FrameId>>,
    pub total: usize,
    pub strokes_per_minute: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub status: AnalysisStatus,
    /// Last stage that completed.
    pub reached: Stage,
    pub insufficient_data: bool,
    pub failure_reason: Option<String>,
    pub issues: Vec<StageIssue>,
    pub params_hash: String,
    pub frame_count: usize,
    pub waterline_y: Option<f64>,
    pub submersions: Vec<Interval>,
    pub touch_frame: Option<FrameId>,
    pub analysis_end_frame: Option<FrameId>,
    pub style: Option<StyleDecision>,
    /// Keyed `dive` and `turn`.
    pub kicks: BTreeMap<String, KickSummary>,
    pub ranges: BTreeMap<Leg, Interval>,
    pub phases: BTreeMap<Leg, PhaseTimeline>,
    pub strokes: Option<StrokeSummary>,
    pub splits: Option<SplitResult>,
}

impl AnalysisReport {
    fn empty(params_hash: String, frame_count: usize) -> Self {
        Self {
            status: AnalysisStatus::Complete,
            reached: Stage::Clean,
            insufficient_data: false,
            failure_reason: None,
            issues: Vec::new(),
            params_hash,
            frame_count,
            waterline_y: None,
            submersions: Vec::new(),
            touch_frame: None,
            analysis_end_frame: None,
            style: None,
            kicks: BTreeMap::new(),
            ranges: BTreeMap::new(),
            phases: BTreeMap::new(),
            strokes: None,
            splits: None,
        }
    }

    fn fail(mut self, stage: Stage, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(%stage, "analysis failed: {}", reason);
        self.status = AnalysisStatus::Failed;
        self.failure_reason = Some(reason);
        self
    }

    fn issue(&mut self, stage: Stage, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%stage, "stage degraded: {}", reason);
        self.status = AnalysisStatus::Partial;
        self.issues.push(StageIssue { stage, reason });
    }

    fn reach(&mut self, stage: Stage) {
        self.reached = stage;
    }
}

/// Runs every stage on one video's records.
///
/// Only invalid parameters are returned as errors; every data problem ends
/// up in the report.
pub fn analyze(
    records: &[FrameRecord],
    video: &VideoContext,
    params: &Params,
    classifier: Option<&dyn StrokeClassifier>,
) -> Result<AnalysisReport, SwimError> {
    let report = prepare(video, params, records.len())?;
    if records.is_empty() {
        return Ok(report.fail(Stage::Clean, "no frame records"));
    }
    let series = clean_records(records, &params.cleaning);
    Ok(run_stages(&series, video, params, classifier, report))
}

/// Runs the stages after cleaning on an existing series.
pub fn analyze_series(
    series: &CleanedSeries,
    video: &VideoContext,
    params: &Params,
    classifier: Option<&dyn StrokeClassifier>,
) -> Result<AnalysisReport, SwimError> {
    let report = prepare(video, params, series.len())?;
    if series.is_empty() {
        return Ok(report.fail(Stage::Clean, "no frame records"));
    }
    Ok(run_stages(series, video, params, classifier, report))
}

fn prepare(
    video: &VideoContext,
    params: &Params,
    frame_count: usize,
) -> Result<AnalysisReport, SwimError> {
    params.validate()?;
    if !(video.fps > 0.0) {
        return Err(SwimError::InvalidParameter(format!(
            "fps must be positive, got {}",
            video.fps
        )));
    }
    if !(video.width_px > 0.0) {
        return Err(SwimError::InvalidParameter(format!(
            "video width must be positive, got {}",
            video.width_px
        )));
    }
    Ok(AnalysisReport::empty(
        params.params_hash_sha256()?,
        frame_count,
    ))
}

fn run_stages(
    series: &CleanedSeries,
    video: &VideoContext,
    params: &Params,
    classifier: Option<&dyn StrokeClassifier>,
    mut report: AnalysisReport,
) -> AnalysisReport {
    let Some(waterline_y) = video.waterline_y else {
        return report.fail(Stage::WaterlineKnown, "waterline was not detected");
    };
    report.waterline_y = Some(waterline_y);
    report.reach(Stage::WaterlineKnown);

    let segments = match find_submersions(series, waterline_y, &params.submersion) {
        Ok(segments) if !segments.is_empty() => segments,
        Ok(_) => {
            report.insufficient_data = true;
            report.issue(Stage::SegmentsFound, "no submersion run below the waterline");
            return report;
        }
        Err(err) => {
            report.insufficient_data = true;
            report.issue(Stage::SegmentsFound, err.to_string());
            return report;
        }
    };
    report.submersions = segments.clone();
    report.reach(Stage::SegmentsFound);
    info!(segments = segments.len(), "submersions found");

    let touch = match find_touch_frame(series, video.width_px, &params.touch) {
        Ok(touch) => touch,
        Err(err) => {
            report.issue(Stage::TouchFrameKnown, err.to_string());
            None
        }
    };
    report.touch_frame = touch;
    report.analysis_end_frame =
        analysis_end_frame(touch, video.frame_count, series, &params.touch);
    report.reach(Stage::TouchFrameKnown);

    let dive = segments[0];
    let turn = segments.get(1).copied();
    let dive_for_kicks = match refine_dive_start(series, dive, &params.kicks) {
        Ok(refined) => refined,
        Err(err) => {
            report.issue(Stage::SegmentsFound, format!("dive start refinement: {err}"));
            dive
        }
    };
    for (name, interval) in [("dive", Some(dive_for_kicks)), ("turn", turn)] {
        let Some(interval) = interval else { continue };
        match find_kicks(series, interval, &params.kicks) {
            Ok(events) => {
                report
                    .kicks
                    .insert(name.to_string(), KickSummary::new(interval, events, video.fps));
            }
            Err(err) => report.issue(Stage::SegmentsFound, format!("{name} kicks: {err}")),
        }
    }

    let ranges = leg_ranges(dive, turn, report.analysis_end_frame);
    for (leg, range) in &ranges {
        match range {
            Ok(range) => {
                report.ranges.insert(*leg, *range);
            }
            Err(reason) => report.issue(Stage::PhasesBuilt, format!("{leg} range: {reason}")),
        }
    }

    let style = resolve_stage_style(series, dive, &report.ranges, params, classifier);
    match style {
        Ok(decision) => {
            report.style = Some(decision);
            report.reach(Stage::StyleKnown);
        }
        Err(err) => report.issue(Stage::StyleKnown, err.to_string()),
    }

    if let Some(decision) = report.style.clone() {
        let legs: Vec<(Leg, Interval)> = report.ranges.iter().map(|(l, r)| (*l, *r)).collect();
        for (leg, range) in legs {
            match build_phases(series, range, leg, decision.style, waterline_y, params) {
                Ok(timeline) => {
                    report.phases.insert(leg, timeline);
                }
                Err(err) => report.issue(Stage::PhasesBuilt, format!("{leg} phases: {err}")),
            }
        }
        if !report.phases.is_empty() {
            report.reach(Stage::PhasesBuilt);
        }
    }

    let lines = CheckpointLines::from_frame_width(video.width_px, &params.checkpoints);
    match detect_splits(
        series,
        dive.start(),
        video.fps,
        lines,
        params.checkpoints.turn_back_ratio,
    ) {
        Ok(splits) => {
            report.splits = Some(splits);
            report.reach(Stage::TimingKnown);
        }
        Err(err) => report.issue(Stage::TimingKnown, err.to_string()),
    }

    if !report.phases.is_empty() {
        report.strokes = Some(stroke_summary(
            &report.phases,
            report.splits.as_ref().and_then(|s| s.final_time_s),
        ));
    }

    if report.status == AnalysisStatus::Complete {
        report.reach(Stage::Done);
    }
    info!(status = ?report.status, reached = %report.reached, "analysis finished");
    report
}

/// Outbound runs from the end of the dive glide to the start of the turn
/// submersion; return runs from the end of the turn glide to the analysis
/// end frame.
fn leg_ranges(
    dive: Interval,
    turn: Option<Interval>,
    end_frame: Option<FrameId>,
) -> Vec<(Leg, Result<Interval, String>)> {
    let Some(turn) = turn else {
        let reason = "only one submersion found".to_string();
        return vec![(Leg::Outbound, Err(reason.clone())), (Leg::Return, Err(reason))];
    };
    let outbound = Interval::new(dive.end(), turn.start()).map_err(|e| e.to_string());
    let ret = match end_frame {
        Some(end) => Interval::new(turn.end(), end).map_err(|e| e.to_string()),
        None => Err("no analysis end frame".to_string()),
    };
    vec![(Leg::Outbound, outbound), (Leg::Return, ret)]
}

fn resolve_stage_style(
    series: &CleanedSeries,
    dive: Interval,
    ranges: &BTreeMap<Leg, Interval>,
    params: &Params,
    classifier: Option<&dyn StrokeClassifier>,
) -> Result<StyleDecision, SwimError> {
    if let Some(style) = params.style_override {
        return Ok(StyleDecision {
            style,
            majority_label: None,
            votes: 0,
            mean_kick_angle_deg: mean_signed_kick_angle(series, dive).ok().flatten(),
        });
    }
    let classifier = classifier.ok_or_else(|| {
        SwimError::Classifier("no classifier and no style override configured".into())
    })?;
    let swimming = ranges.get(&Leg::Outbound).copied().ok_or_else(|| {
        SwimError::InsufficientData("no outbound range to classify".into())
    })?;
    classify_style(series, dive, swimming, classifier)
}

fn stroke_summary(
    phases: &BTreeMap<Leg, PhaseTimeline>,
    final_time_s: Option<f64>,
) -> StrokeSummary {
    let per_leg: BTreeMap<Leg, usize> = phases
        .iter()
        .map(|(leg, t)| (*leg, t.stroke_count))
        .collect();
    let stroke_frames = phases
        .iter()
        .map(|(leg, t)| (*leg, t.stroke_frames.clone()))
        .collect();
    let total = per_leg.values().sum();
    let strokes_per_minute = final_time_s
        .filter(|&t| t > 0.0)
        .map(|t| total as f64 / (t / 60.0));
    StrokeSummary {
        per_leg,
        stroke_frames,
        total,
        strokes_per_minute,
    }
}
