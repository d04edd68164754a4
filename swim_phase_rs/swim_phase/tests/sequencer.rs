//! Whole-video scenarios on a synthetic freestyle swim.
//!
//! The swimmer dives at frame 100, glides under water until 220, swims
//! right-to-left to the turn at frame 425, is under water again from 500 to
//! 650 and touches the right wall at frame 858.

use std::f64::consts::PI;
use std::fmt::Write as _;

use ndarray::Array2;

use swim_phase::phases::PhaseStrategy;
use swim_phase::records::BodyPart;
use swim_phase::sequencer::analyze_series;
use swim_phase::splits::Checkpoint;
use swim_phase::style::PrecomputedLabels;
use swim_phase::{
    analyze, parse_records, AnalysisStatus, CleanedSeries, Column, FrameId, Leg, Params,
    PhaseKind, Stage, StrokeStyle, VideoContext,
};

const FRAMES: i64 = 1000;
const PERIOD: f64 = 40.0;

struct Pose {
    bbox: [f64; 4],
    keypoints: [[f64; 2]; BodyPart::COUNT],
}

fn pose(f: i64, submerged: &[(i64, i64)]) -> Pose {
    let t = f as f64;
    let cx = if f <= 425 {
        1800.0 - 4.0 * t
    } else {
        100.0 + 4.0 * (t - 425.0)
    };
    let phase = 2.0 * PI * t / PERIOD;
    let (s, c) = phase.sin_cos();
    let head_y = if submerged.iter().any(|&(a, b)| (a..=b).contains(&f)) {
        350.0
    } else {
        250.0
    };
    let mut keypoints = [[0.0; 2]; BodyPart::COUNT];
    keypoints[BodyPart::Head.index()] = [cx - 40.0, head_y];
    keypoints[BodyPart::Shoulder.index()] = [cx - 20.0, 300.0];
    keypoints[BodyPart::Elbow.index()] = [cx - 20.0 + 20.0 * s, 310.0];
    keypoints[BodyPart::Wrist.index()] = [cx - 20.0 + 40.0 * s, 320.0 + 60.0 * c];
    keypoints[BodyPart::Hip.index()] = [cx, 330.0];
    keypoints[BodyPart::Knee.index()] = [cx + 40.0, 340.0 + 10.0 * s];
    keypoints[BodyPart::Ankle.index()] = [cx + 80.0, 330.0];
    Pose {
        bbox: [cx, 320.0, 100.0, 60.0],
        keypoints,
    }
}

fn swim_series(submerged: &[(i64, i64)]) -> CleanedSeries {
    let mut values = Array2::zeros((FRAMES as usize, Column::COUNT));
    for f in 0..FRAMES {
        let p = pose(f, submerged);
        let row = f as usize;
        values[[row, Column::BboxCx.index()]] = p.bbox[0];
        values[[row, Column::BboxCy.index()]] = p.bbox[1];
        values[[row, Column::BboxWidth.index()]] = p.bbox[2];
        values[[row, Column::BboxHeight.index()]] = p.bbox[3];
        for part in BodyPart::ALL {
            let [x, y] = p.keypoints[part.index()];
            values[[row, Column::x(part).index()]] = x;
            values[[row, Column::y(part).index()]] = y;
        }
    }
    CleanedSeries::from_parts((0..FRAMES).collect(), values).expect("synthetic series")
}

fn swim_text(submerged: &[(i64, i64)]) -> String {
    let mut text = String::new();
    for f in 0..FRAMES {
        if f == 300 {
            writeln!(text, "{f} no detection").unwrap();
            continue;
        }
        if f == 301 {
            writeln!(text, "garbage line").unwrap();
        }
        let p = pose(f, submerged);
        let [cx, cy, w, h] = p.bbox;
        write!(text, "{f} 0 {cx:.2} {cy:.2} {w:.2} {h:.2} 0.91").unwrap();
        for [x, y] in p.keypoints {
            write!(text, " {x:.3} {y:.3} 0.80").unwrap();
        }
        text.push('\n');
    }
    text
}

fn video(waterline_y: Option<f64>) -> VideoContext {
    VideoContext {
        width_px: 1920.0,
        fps: 30.0,
        frame_count: Some(FRAMES),
        waterline_y,
    }
}

const TWO_DIVES: &[(i64, i64)] = &[(100, 220), (500, 650)];

fn bounds(iv: &swim_phase::Interval) -> (FrameId, FrameId) {
    (iv.start(), iv.end())
}

#[test]
fn full_swim_completes() {
    let series = swim_series(TWO_DIVES);
    let labels = PrecomputedLabels(vec![StrokeStyle::Freestyle.label(); 281]);
    let report = analyze_series(&series, &video(Some(300.0)), &Params::default(), Some(&labels))
        .expect("analysis");

    assert_eq!(report.status, AnalysisStatus::Complete, "{:?}", report.issues);
    assert_eq!(report.reached, Stage::Done);
    assert!(!report.insufficient_data);

    let segments: Vec<_> = report.submersions.iter().map(bounds).collect();
    assert_eq!(segments, vec![(100, 220), (500, 650)]);
    assert_eq!(report.touch_frame, Some(858));
    assert_eq!(report.analysis_end_frame, Some(858));
    assert_eq!(bounds(&report.ranges[&Leg::Outbound]), (220, 500));
    assert_eq!(bounds(&report.ranges[&Leg::Return]), (650, 858));

    let dive = &report.kicks["dive"];
    let frames: Vec<FrameId> = dive.events.iter().map(|e| e.frame).collect();
    assert_eq!(frames, vec![130, 170, 210]);
    assert_eq!(report.kicks["turn"].count, 3);

    let style = report.style.as_ref().expect("style");
    assert_eq!(style.style, StrokeStyle::Freestyle);
    assert_eq!(style.majority_label, Some(2));
    assert!(style.mean_kick_angle_deg.expect("mean angle") < 180.0);

    for leg in Leg::ALL {
        let timeline = &report.phases[&leg];
        assert!(timeline.is_contiguous());
        assert!(timeline.stroke_count > 0);
        assert!(timeline.regions.iter().any(|r| r.kind == PhaseKind::Recovery));
    }

    let splits = report.splits.as_ref().expect("splits");
    assert_eq!(splits.start_frame, 100);
    assert_eq!(splits.frame(Checkpoint::Mid), Some(414));
    assert_eq!(splits.frame(Checkpoint::Far), Some(853));
    let near = splits.frame(Checkpoint::Near).expect("near checkpoint");
    assert!((200..300).contains(&near));
    let final_time = splits.final_time_s.expect("final time");
    assert!((final_time - 753.0 / 30.0).abs() < 1e-9);

    let strokes = report.strokes.as_ref().expect("strokes");
    assert_eq!(
        strokes.total,
        report.phases.values().map(|t| t.stroke_count).sum::<usize>()
    );
    assert!(strokes.strokes_per_minute.expect("rate") > 0.0);
}

#[test]
fn breaststroke_labels_drive_breaststroke_phases() {
    let series = swim_series(TWO_DIVES);
    let labels = PrecomputedLabels(vec![StrokeStyle::Breaststroke.label(); 281]);
    let report = analyze_series(&series, &video(Some(300.0)), &Params::default(), Some(&labels))
        .expect("analysis");

    assert_eq!(report.status, AnalysisStatus::Complete, "{:?}", report.issues);
    let style = report.style.as_ref().expect("style");
    assert_eq!(style.style, StrokeStyle::Breaststroke);
    assert_eq!(style.majority_label, Some(1));

    for leg in Leg::ALL {
        let timeline = &report.phases[&leg];
        assert_eq!(timeline.strategy, PhaseStrategy::Breaststroke);
        assert!(timeline.is_contiguous(), "{leg}: {:?}", timeline.regions);
        assert!(timeline.regions.iter().all(|r| matches!(
            r.kind,
            PhaseKind::Propulsion | PhaseKind::Recovery | PhaseKind::Glide
        )));
        assert!(timeline.stroke_count > 0, "{leg}");
    }
}

#[test]
fn short_label_list_is_a_style_issue() {
    let series = swim_series(TWO_DIVES);
    let labels = PrecomputedLabels(vec![StrokeStyle::Freestyle.label(); 100]);
    let report = analyze_series(&series, &video(Some(300.0)), &Params::default(), Some(&labels))
        .expect("analysis");
    assert_eq!(report.status, AnalysisStatus::Partial);
    assert!(report.style.is_none());
    assert!(report.phases.is_empty());
    assert!(report.issues.iter().any(|i| i.stage == Stage::StyleKnown));
}

#[test]
fn missing_waterline_fails() {
    let series = swim_series(TWO_DIVES);
    let report = analyze_series(&series, &video(None), &Params::default(), None).expect("analysis");
    assert_eq!(report.status, AnalysisStatus::Failed);
    assert_eq!(report.reached, Stage::Clean);
    assert!(report.failure_reason.is_some());
    assert!(report.submersions.is_empty());
}

#[test]
fn dry_swimmer_is_insufficient_data() {
    let series = swim_series(&[]);
    let report =
        analyze_series(&series, &video(Some(300.0)), &Params::default(), None).expect("analysis");
    assert_eq!(report.status, AnalysisStatus::Partial);
    assert!(report.insufficient_data);
    assert_eq!(report.reached, Stage::WaterlineKnown);
    assert!(report.splits.is_none());
}

#[test]
fn missing_classifier_keeps_timing() {
    let series = swim_series(TWO_DIVES);
    let report =
        analyze_series(&series, &video(Some(300.0)), &Params::default(), None).expect("analysis");
    assert_eq!(report.status, AnalysisStatus::Partial);
    assert!(report.style.is_none());
    assert!(report.phases.is_empty());
    assert!(report.strokes.is_none());
    assert!(report.issues.iter().any(|i| i.stage == Stage::StyleKnown));
    assert_eq!(
        report.splits.as_ref().and_then(|s| s.frame(Checkpoint::Far)),
        Some(853)
    );
}

#[test]
fn single_submersion_skips_legs() {
    let series = swim_series(&[(100, 220)]);
    let params = Params {
        style_override: Some(StrokeStyle::Freestyle),
        ..Params::default()
    };
    let report = analyze_series(&series, &video(Some(300.0)), &params, None).expect("analysis");
    assert_eq!(report.status, AnalysisStatus::Partial);
    assert!(report.ranges.is_empty());
    assert!(report.phases.is_empty());
    assert!(report.kicks.contains_key("dive"));
    assert!(!report.kicks.contains_key("turn"));
    let style = report.style.as_ref().expect("forced style");
    assert_eq!(style.style, StrokeStyle::Freestyle);
    assert_eq!(style.majority_label, None);
}

#[test]
fn invalid_fps_is_an_error() {
    let series = swim_series(TWO_DIVES);
    let mut ctx = video(Some(300.0));
    ctx.fps = 0.0;
    assert!(analyze_series(&series, &ctx, &Params::default(), None).is_err());
}

#[test]
fn keypoint_text_end_to_end() {
    let parsed = parse_records(&swim_text(TWO_DIVES));
    assert_eq!(parsed.skipped.len(), 1);
    assert_eq!(parsed.no_detection_frames, 1);
    assert_eq!(parsed.records.len(), FRAMES as usize);

    let params = Params {
        style_override: Some(StrokeStyle::Freestyle),
        ..Params::default()
    };
    let report = analyze(&parsed.records, &video(Some(300.0)), &params, None).expect("analysis");
    assert_ne!(report.status, AnalysisStatus::Failed);
    assert_eq!(report.frame_count, FRAMES as usize);

    assert_eq!(report.submersions.len(), 2);
    let near = |a: FrameId, b: FrameId| (a - b).abs() <= 4;
    let (dive, turn) = (report.submersions[0], report.submersions[1]);
    assert!(near(dive.start(), 100) && near(dive.end(), 220), "{dive}");
    assert!(near(turn.start(), 500) && near(turn.end(), 650), "{turn}");

    let touch = report.touch_frame.expect("touch frame");
    assert!(near(touch, 858));
    let far = report
        .splits
        .as_ref()
        .and_then(|s| s.frame(Checkpoint::Far))
        .expect("far checkpoint");
    assert!(near(far, 853));
    for timeline in report.phases.values() {
        assert!(timeline.is_contiguous());
    }
}
