//! Knee-angle kick events inside submersion intervals.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filters::local_minima;
use crate::records::BodyPart;
use crate::series::{CleanedSeries, Column};
use crate::{FrameId, Interval, KickParams, SwimError};

/// Angle at vertex `b` of the triangle `a-b-c`, in degrees within
/// `[0, 180]`. `None` when either arm has zero length or a coordinate is
/// NaN.
pub fn joint_angle(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> Option<f64> {
    let ba = [a[0] - b[0], a[1] - b[1]];
    let bc = [c[0] - b[0], c[1] - b[1]];
    let norm = ba[0].hypot(ba[1]) * bc[0].hypot(bc[1]);
    if !(norm > 0.0) {
        return None;
    }
    let cos = ((ba[0] * bc[0] + ba[1] * bc[1]) / norm).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

/// Knee angle used for kick events: the smaller of the hip-knee-ankle angle
/// and its reversed-order counterpart.
pub fn kick_angle(hip: [f64; 2], knee: [f64; 2], ankle: [f64; 2]) -> Option<f64> {
    let forward = joint_angle(hip, knee, ankle)?;
    let reversed = joint_angle(ankle, knee, hip)?;
    Some(forward.min(reversed))
}

/// Directed angle from `b->a` to `b->c`, in degrees within `[0, 360)`.
pub fn signed_joint_angle(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> Option<f64> {
    let ba = [a[0] - b[0], a[1] - b[1]];
    let bc = [c[0] - b[0], c[1] - b[1]];
    let dot = ba[0] * bc[0] + ba[1] * bc[1];
    let det = ba[0] * bc[1] - ba[1] * bc[0];
    if dot.is_nan() || det.is_nan() {
        return None;
    }
    let deg = det.atan2(dot).to_degrees();
    Some(if deg < 0.0 { deg + 360.0 } else { deg })
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KickEvent {
    pub frame: FrameId,
    pub angle_deg: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KickSummary {
    pub interval: Interval,
    pub events: Vec<KickEvent>,
    pub count: usize,
    pub mean_angle_deg: Option<f64>,
    pub min_angle_deg: Option<f64>,
    pub max_angle_deg: Option<f64>,
    /// Kicks per second over the interval.
    pub frequency_hz: Option<f64>,
}

impl KickSummary {
    pub fn new(interval: Interval, events: Vec<KickEvent>, fps: f64) -> Self {
        let count = events.len();
        let angles = events.iter().map(|e| e.angle_deg);
        let (mean, min, max) = if count == 0 {
            (None, None, None)
        } else {
            (
                Some(angles.clone().sum::<f64>() / count as f64),
                angles.clone().reduce(f64::min),
                angles.reduce(f64::max),
            )
        };
        let duration_s = interval.span() as f64 / fps;
        let frequency_hz = (fps > 0.0 && duration_s > 0.0).then(|| count as f64 / duration_s);
        Self {
            interval,
            events,
            count,
            mean_angle_deg: mean,
            min_angle_deg: min,
            max_angle_deg: max,
            frequency_hz,
        }
    }
}

fn point(series: &CleanedSeries, part: BodyPart, row: usize) -> Result<[f64; 2], SwimError> {
    Ok([
        series.value(Column::x(part), row)?,
        series.value(Column::y(part), row)?,
    ])
}

/// Per-row knee angles over `interval`, NaN where the angle is undefined.
pub fn knee_angles(series: &CleanedSeries, interval: Interval) -> Result<Vec<f64>, SwimError> {
    series
        .rows_in(interval)
        .map(|row| {
            let hip = point(series, BodyPart::Hip, row)?;
            let knee = point(series, BodyPart::Knee, row)?;
            let ankle = point(series, BodyPart::Ankle, row)?;
            Ok(kick_angle(hip, knee, ankle).unwrap_or(f64::NAN))
        })
        .collect()
}

/// Kick events: strict local minima of the knee angle at or below the
/// configured ceiling. Intervals with fewer than three samples have none.
pub fn find_kicks(
    series: &CleanedSeries,
    interval: Interval,
    params: &KickParams,
) -> Result<Vec<KickEvent>, SwimError> {
    let rows = series.rows_in(interval);
    let angles = knee_angles(series, interval)?;
    if angles.len() < 3 {
        return Ok(Vec::new());
    }
    let frames = &series.frames()[rows];
    let events: Vec<KickEvent> = local_minima(&angles, params.extrema_order)
        .into_iter()
        .filter(|&i| angles[i] <= params.max_angle_deg)
        .map(|i| KickEvent {
            frame: frames[i],
            angle_deg: angles[i],
        })
        .collect();
    debug!(interval = %interval, kicks = events.len(), "kick events");
    Ok(events)
}

/// Moves the start of the dive interval to the first frame whose ankle is
/// left of the configured limit, which drops the push-off from the block.
pub fn refine_dive_start(
    series: &CleanedSeries,
    interval: Interval,
    params: &KickParams,
) -> Result<Interval, SwimError> {
    let Some(limit) = params.ankle_x_limit_px else {
        return Ok(interval);
    };
    let ankle_x = series.column(Column::x(BodyPart::Ankle))?;
    let start = series
        .rows_in(interval)
        .find(|&row| ankle_x[row] < limit)
        .map(|row| series.frames()[row]);
    match start {
        Some(frame) => interval.with_start(frame),
        None => Ok(interval),
    }
}

/// Mean directed hip-knee-ankle angle over `interval`. Used to tell
/// backstroke from freestyle.
pub fn mean_signed_kick_angle(
    series: &CleanedSeries,
    interval: Interval,
) -> Result<Option<f64>, SwimError> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for row in series.rows_in(interval) {
        let hip = point(series, BodyPart::Hip, row)?;
        let knee = point(series, BodyPart::Knee, row)?;
        let ankle = point(series, BodyPart::Ankle, row)?;
        if let Some(angle) = signed_joint_angle(hip, knee, ankle) {
            sum += angle;
            count += 1;
        }
    }
    Ok((count > 0).then(|| sum / count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_joint_angle_right_angle() {
        let angle = joint_angle([1.0, 0.0], [0.0, 0.0], [0.0, 1.0]).unwrap();
        assert!((angle - 90.0).abs() < 1e-9);
        assert!(joint_angle([0.0, 0.0], [0.0, 0.0], [1.0, 0.0]).is_none());
    }

    #[test]
    fn test_straight_leg_is_180() {
        let angle = kick_angle([0.0, 0.0], [1.0, 0.0], [2.0, 0.0]).unwrap();
        assert!((angle - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_signed_angle_wraps() {
        let ccw = signed_joint_angle([1.0, 0.0], [0.0, 0.0], [0.0, 1.0]).unwrap();
        let cw = signed_joint_angle([0.0, 1.0], [0.0, 0.0], [1.0, 0.0]).unwrap();
        assert!((ccw - 90.0).abs() < 1e-9);
        assert!((cw - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_frequency() {
        let iv = Interval::new(0, 60).unwrap();
        let events = vec![
            KickEvent {
                frame: 10,
                angle_deg: 120.0,
            },
            KickEvent {
                frame: 40,
                angle_deg: 100.0,
            },
        ];
        let summary = KickSummary::new(iv, events, 30.0);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean_angle_deg, Some(110.0));
        assert_eq!(summary.min_angle_deg, Some(100.0));
        assert_eq!(summary.max_angle_deg, Some(120.0));
        assert!((summary.frequency_hz.unwrap() - 1.0).abs() < 1e-9);
    }

    fn leg_series(knee_y: &[f64], ankle_x0: f64, ankle_step: f64) -> CleanedSeries {
        let n = knee_y.len();
        let mut values = Array2::from_elem((n, Column::COUNT), 100.0);
        for (row, &ky) in knee_y.iter().enumerate() {
            values[[row, Column::x(BodyPart::Hip).index()]] = 0.0;
            values[[row, Column::y(BodyPart::Hip).index()]] = 0.0;
            values[[row, Column::x(BodyPart::Knee).index()]] = 10.0;
            values[[row, Column::y(BodyPart::Knee).index()]] = ky;
            values[[row, Column::x(BodyPart::Ankle).index()]] = ankle_x0 + ankle_step * row as f64;
            values[[row, Column::y(BodyPart::Ankle).index()]] = 0.0;
        }
        CleanedSeries::from_parts((0..n as FrameId).collect(), values).unwrap()
    }

    #[test]
    fn test_kicks_at_deep_bends_only() {
        // knee offset from the hip-ankle line bends the leg; 10 gives 90
        // degrees, 2 gives about 157 degrees
        let mut knee_y = vec![0.5; 40];
        knee_y[10] = 10.0;
        knee_y[25] = 2.0;
        let series = leg_series(&knee_y, 20.0, 0.0);
        let params = KickParams {
            extrema_order: 3,
            ..KickParams::default()
        };
        let events = find_kicks(&series, Interval::new(0, 39).unwrap(), &params).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame, 10);
        assert!((events[0].angle_deg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_interval_has_no_kicks() {
        let series = leg_series(&[0.5, 10.0, 0.5], 20.0, 0.0);
        let iv = Interval::new(1, 2).unwrap();
        assert!(find_kicks(&series, iv, &KickParams::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_refine_dive_start() {
        let series = leg_series(&[1.0; 10], 1000.0, -100.0);
        let params = KickParams {
            ankle_x_limit_px: Some(500.0),
            ..KickParams::default()
        };
        // ankle x per row is 1000 - 100 * row, first below 500 at row 6
        let refined = refine_dive_start(&series, Interval::new(2, 9).unwrap(), &params).unwrap();
        assert_eq!((refined.start(), refined.end()), (6, 9));
        let params = KickParams {
            ankle_x_limit_px: Some(10.0),
            ..KickParams::default()
        };
        let kept = refine_dive_start(&series, Interval::new(2, 9).unwrap(), &params).unwrap();
        assert_eq!(kept.start(), 2);
    }
}
