//! Series cleaner: raw frame records to an immutable, gap-free series.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use ndarray::{s, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::filters::{centered_rolling_mean, interpolate_linear};
use crate::records::{Axis, BodyPart, FrameRecord};
use crate::{CleanParams, FrameId, Interval, SwimError};

/// A coordinate column of the cleaned series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Column {
    BboxCx,
    BboxCy,
    BboxWidth,
    BboxHeight,
    Keypoint(BodyPart, Axis),
}

impl Column {
    pub const COUNT: usize = 4 + BodyPart::COUNT * 2;

    pub fn x(part: BodyPart) -> Column {
        Column::Keypoint(part, Axis::X)
    }

    pub fn y(part: BodyPart) -> Column {
        Column::Keypoint(part, Axis::Y)
    }

    pub fn index(self) -> usize {
        match self {
            Column::BboxCx => 0,
            Column::BboxCy => 1,
            Column::BboxWidth => 2,
            Column::BboxHeight => 3,
            Column::Keypoint(part, axis) => {
                4 + part.index() * 2
                    + match axis {
                        Axis::X => 0,
                        Axis::Y => 1,
                    }
            }
        }
    }

    pub fn all() -> impl Iterator<Item = Column> {
        [
            Column::BboxCx,
            Column::BboxCy,
            Column::BboxWidth,
            Column::BboxHeight,
        ]
        .into_iter()
        .chain(
            BodyPart::ALL
                .into_iter()
                .flat_map(|p| [Column::x(p), Column::y(p)]),
        )
    }

    pub fn is_keypoint(self) -> bool {
        matches!(self, Column::Keypoint(..))
    }

    fn raw_value(self, record: &FrameRecord) -> f64 {
        let Some(det) = record.detection.as_ref() else {
            return f64::NAN;
        };
        match self {
            Column::BboxCx => det.bbox.cx,
            Column::BboxCy => det.bbox.cy,
            Column::BboxWidth => det.bbox.width,
            Column::BboxHeight => det.bbox.height,
            Column::Keypoint(part, axis) => det.keypoint(part).coord(axis),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::BboxCx => f.write_str("bbox_cx"),
            Column::BboxCy => f.write_str("bbox_cy"),
            Column::BboxWidth => f.write_str("bbox_width"),
            Column::BboxHeight => f.write_str("bbox_height"),
            Column::Keypoint(part, axis) => write!(f, "{}_{}", part.name(), axis),
        }
    }
}

/// Cleaned, smoothed coordinates, one row per frame record.
#[derive(Clone, Debug)]
pub struct CleanedSeries {
    frames: Vec<FrameId>,
    values: Array2<f64>,
    unusable: Vec<Column>,
}

impl CleanedSeries {
    /// Wraps already-clean values. Columns containing only NaN are marked
    /// unusable; `values` must be `frames.len()` by [`Column::COUNT`] and
    /// frames must increase strictly.
    pub fn from_parts(frames: Vec<FrameId>, values: Array2<f64>) -> Result<Self, SwimError> {
        if values.dim() != (frames.len(), Column::COUNT) {
            return Err(SwimError::InvalidParameter(format!(
                "series shape {:?} does not match {} frames x {} columns",
                values.dim(),
                frames.len(),
                Column::COUNT
            )));
        }
        if frames.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SwimError::InvalidParameter(
                "frame ids must be strictly increasing".into(),
            ));
        }
        let unusable = Column::all()
            .filter(|c| values.column(c.index()).iter().all(|v| v.is_nan()))
            .collect();
        Ok(Self {
            frames,
            values,
            unusable,
        })
    }

    pub fn frames(&self) -> &[FrameId] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first_frame(&self) -> Option<FrameId> {
        self.frames.first().copied()
    }

    pub fn last_frame(&self) -> Option<FrameId> {
        self.frames.last().copied()
    }

    pub fn unusable_columns(&self) -> &[Column] {
        &self.unusable
    }

    pub fn is_usable(&self, column: Column) -> bool {
        !self.unusable.contains(&column)
    }

    pub fn column(&self, column: Column) -> Result<ArrayView1<'_, f64>, SwimError> {
        if !self.is_usable(column) {
            return Err(SwimError::UnusableColumn(column));
        }
        Ok(self.values.column(column.index()))
    }

    /// Copies `column` over the row range `rows`.
    pub fn values(&self, column: Column, rows: Range<usize>) -> Result<Vec<f64>, SwimError> {
        Ok(self.column(column)?.slice(s![rows]).to_vec())
    }

    pub fn value(&self, column: Column, row: usize) -> Result<f64, SwimError> {
        Ok(self.column(column)?[row])
    }

    pub fn index_of(&self, frame: FrameId) -> Option<usize> {
        self.frames.binary_search(&frame).ok()
    }

    /// Rows whose frame id lies inside `interval`.
    pub fn rows_in(&self, interval: Interval) -> Range<usize> {
        let lo = self.frames.partition_point(|&f| f < interval.start());
        let hi = self.frames.partition_point(|&f| f <= interval.end());
        lo..hi.max(lo)
    }

    /// Rows from `frame` onwards.
    pub fn rows_from(&self, frame: FrameId) -> Range<usize> {
        self.frames.partition_point(|&f| f < frame)..self.frames.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub frames: usize,
    pub no_detection_frames: usize,
    /// Values masked by the outlier rules, per keypoint column label.
    pub masked_outliers: BTreeMap<String, usize>,
    pub unusable_columns: Vec<String>,
}

pub fn clean_records(records: &[FrameRecord], params: &CleanParams) -> CleanedSeries {
    clean_records_with_report(records, params).0
}

/// Builds the series: no-detection frames become NaN rows, keypoint outliers
/// are masked, every gap is interpolated over frame ids and all columns are
/// smoothed with a centered moving average.
pub fn clean_records_with_report(
    records: &[FrameRecord],
    params: &CleanParams,
) -> (CleanedSeries, CleaningReport) {
    let frames: Vec<FrameId> = records.iter().map(|r| r.frame_id).collect();
    let n = frames.len();
    let mut values = Array2::from_elem((n, Column::COUNT), f64::NAN);
    let mut report = CleaningReport {
        frames: n,
        no_detection_frames: records.iter().filter(|r| r.detection.is_none()).count(),
        ..CleaningReport::default()
    };
    let mut unusable = Vec::new();

    for column in Column::all() {
        let mut col: Vec<f64> = records.iter().map(|r| column.raw_value(r)).collect();
        if column.is_keypoint() {
            let masked = mask_outliers(&mut col, params.floor_px, params.max_jump_px);
            report.masked_outliers.insert(column.to_string(), masked);
        }
        if !interpolate_linear(&frames, &mut col) {
            if n > 0 {
                warn!(column = %column, "column has no valid samples");
            }
            unusable.push(column);
            report.unusable_columns.push(column.to_string());
            continue;
        }
        let smoothed = centered_rolling_mean(&col, params.smoothing_window);
        values
            .column_mut(column.index())
            .iter_mut()
            .zip(smoothed)
            .for_each(|(dst, v)| *dst = v);
    }

    debug!(
        frames = n,
        unusable = unusable.len(),
        "cleaned keypoint series"
    );
    (
        CleanedSeries {
            frames,
            values,
            unusable,
        },
        report,
    )
}

/// Masks implausible keypoint coordinates in place and returns how many
/// values were newly masked. Values below `floor` go first; then a value is
/// masked when it differs by more than `max_jump` from its previous or its
/// next sample. Both jump comparisons read the floor-masked values, so either
/// one can invalidate a sample. A NaN neighbour never invalidates.
pub fn mask_outliers(values: &mut [f64], floor: f64, max_jump: f64) -> usize {
    let before = values.iter().filter(|v| v.is_nan()).count();
    for v in values.iter_mut() {
        if *v < floor {
            *v = f64::NAN;
        }
    }

    let snapshot = values.to_vec();
    let jumps = |i: usize, j: usize| (snapshot[i] - snapshot[j]).abs() > max_jump;
    let n = snapshot.len();
    for i in 0..n {
        let backward = i > 0 && jumps(i, i - 1);
        let forward = i + 1 < n && jumps(i, i + 1);
        if backward || forward {
            values[i] = f64::NAN;
        }
    }

    values.iter().filter(|v| v.is_nan()).count() - before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{BoundingBox, Detection, Keypoint};

    fn record(frame: FrameId, wrist_x: f64) -> FrameRecord {
        let kp = Keypoint {
            x: 300.0,
            y: 200.0,
            confidence: 0.9,
        };
        let mut keypoints = [kp; BodyPart::COUNT];
        keypoints[BodyPart::Wrist.index()].x = wrist_x;
        FrameRecord {
            frame_id: frame,
            detection: Some(Detection {
                class_id: 0,
                bbox: BoundingBox {
                    cx: 500.0,
                    cy: 300.0,
                    width: 100.0,
                    height: 50.0,
                    confidence: 0.9,
                },
                keypoints,
            }),
        }
    }

    fn no_smoothing() -> CleanParams {
        CleanParams {
            smoothing_window: 1,
            ..CleanParams::default()
        }
    }

    #[test]
    fn test_column_indices_are_dense() {
        let idx: Vec<usize> = Column::all().map(Column::index).collect();
        assert_eq!(idx, (0..Column::COUNT).collect::<Vec<_>>());
        assert_eq!(Column::y(BodyPart::Wrist).to_string(), "wrist_y");
    }

    #[test]
    fn test_mask_outliers_sequence() {
        let mut v = vec![100.0, 5.0, 110.0, 300.0, 120.0, 125.0];
        let masked = mask_outliers(&mut v, 10.0, 50.0);
        // 5 is below the floor; 110 jumps to the next sample, 300 both
        // ways, 120 from the previous one.
        assert!(v[1].is_nan());
        assert!(v[2].is_nan());
        assert!(v[3].is_nan());
        assert!(v[4].is_nan());
        assert_eq!(v[0], 100.0);
        assert_eq!(v[5], 125.0);
        assert_eq!(masked, 4);
    }

    #[test]
    fn test_mask_outliers_forward_jump_alone() {
        let mut v = vec![100.0, 100.0, 300.0, 300.0, 300.0];
        let masked = mask_outliers(&mut v, 10.0, 50.0);
        // 100 at index 1 only differs from its next sample
        assert!(v[1].is_nan());
        assert!(v[2].is_nan());
        assert_eq!(v[0], 100.0);
        assert_eq!(&v[3..], &[300.0, 300.0]);
        assert_eq!(masked, 2);
    }

    #[test]
    fn test_mask_outliers_ignores_nan_neighbours() {
        let mut v = vec![100.0, 5.0, 300.0];
        assert_eq!(mask_outliers(&mut v, 10.0, 50.0), 1);
        assert_eq!(v[0], 100.0);
        assert_eq!(v[2], 300.0);
    }

    #[test]
    fn test_no_detection_rows_are_interpolated() {
        let mut records = vec![record(0, 100.0), record(1, 110.0), record(3, 130.0)];
        records.insert(
            2,
            FrameRecord {
                frame_id: 2,
                detection: None,
            },
        );
        let (series, report) = clean_records_with_report(&records, &no_smoothing());
        assert_eq!(series.len(), 4);
        assert_eq!(report.no_detection_frames, 1);
        let wrist = series.column(Column::x(BodyPart::Wrist)).unwrap();
        assert!((wrist[2] - 120.0).abs() < 1e-9);
        assert!((series.value(Column::BboxCx, 2).unwrap() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_nan_column_is_unusable() {
        let records: Vec<_> = (0..5).map(|f| record(f, 3.0)).collect();
        let series = clean_records(&records, &CleanParams::default());
        let wrist_x = Column::x(BodyPart::Wrist);
        assert!(!series.is_usable(wrist_x));
        assert!(matches!(
            series.column(wrist_x),
            Err(SwimError::UnusableColumn(c)) if c == wrist_x
        ));
        assert!(series.column(Column::y(BodyPart::Wrist)).is_ok());
    }

    #[test]
    fn test_rows_in_interval() {
        let records: Vec<_> = [2, 4, 6, 8].iter().map(|&f| record(f, 100.0)).collect();
        let series = clean_records(&records, &CleanParams::default());
        assert_eq!(series.rows_in(Interval::new(3, 6).unwrap()), 1..3);
        assert_eq!(series.rows_in(Interval::new(9, 12).unwrap()), 4..4);
        assert_eq!(series.rows_from(5), 2..4);
        assert_eq!(series.index_of(6), Some(2));
    }
}
