//! Stroke-style decision from an external per-frame classifier.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::kicks::mean_signed_kick_angle;
use crate::records::BodyPart;
use crate::series::{CleanedSeries, Column};
use crate::{Interval, SwimError};

/// Mean directed knee angle above which a back-or-free vote is backstroke.
pub const BACKSTROKE_KICK_ANGLE_DEG: f64 = 180.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeStyle {
    Backstroke,
    Breaststroke,
    Freestyle,
    Butterfly,
}

impl StrokeStyle {
    /// Class index used by the classifier.
    pub fn label(self) -> u8 {
        match self {
            StrokeStyle::Backstroke => 0,
            StrokeStyle::Breaststroke => 1,
            StrokeStyle::Freestyle => 2,
            StrokeStyle::Butterfly => 3,
        }
    }

    pub fn from_label(label: u8) -> Option<Self> {
        match label {
            0 => Some(StrokeStyle::Backstroke),
            1 => Some(StrokeStyle::Breaststroke),
            2 => Some(StrokeStyle::Freestyle),
            3 => Some(StrokeStyle::Butterfly),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StrokeStyle::Backstroke => "backstroke",
            StrokeStyle::Breaststroke => "breaststroke",
            StrokeStyle::Freestyle => "freestyle",
            StrokeStyle::Butterfly => "butterfly",
        }
    }
}

impl fmt::Display for StrokeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrokeStyle {
    type Err = SwimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(label) = trimmed.parse::<u8>() {
            return StrokeStyle::from_label(label)
                .ok_or_else(|| SwimError::Classifier(format!("unknown style label {label}")));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "backstroke" | "back" => Ok(StrokeStyle::Backstroke),
            "breaststroke" | "breast" => Ok(StrokeStyle::Breaststroke),
            "freestyle" | "free" => Ok(StrokeStyle::Freestyle),
            "butterfly" | "fly" => Ok(StrokeStyle::Butterfly),
            other => Err(SwimError::Classifier(format!("unknown style {other:?}"))),
        }
    }
}

/// Per-frame stroke classifier. Receives one standardized feature row per
/// frame of the swimming stretch and returns one class label per row.
pub trait StrokeClassifier: Send + Sync {
    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Vec<u8>, SwimError>;
}

/// Labels produced ahead of time, e.g. by an offline model run. They must
/// cover exactly the frames of the classified stretch.
#[derive(Clone, Debug, Default)]
pub struct PrecomputedLabels(pub Vec<u8>);

impl StrokeClassifier for PrecomputedLabels {
    fn predict(&self, _features: ArrayView2<'_, f64>) -> Result<Vec<u8>, SwimError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StyleDecision {
    pub style: StrokeStyle,
    /// Majority classifier label, absent when the style was forced.
    pub majority_label: Option<u8>,
    pub votes: usize,
    pub mean_kick_angle_deg: Option<f64>,
}

/// Feature matrix for the classifier: the y coordinate of every tracked
/// body part over `interval`, z-scored per column.
pub fn swimming_features(
    series: &CleanedSeries,
    interval: Interval,
) -> Result<Array2<f64>, SwimError> {
    let rows = series.rows_in(interval);
    let mut features = Array2::zeros((rows.len(), BodyPart::COUNT));
    for (j, part) in BodyPart::ALL.into_iter().enumerate() {
        let values = series.values(Column::y(part), rows.clone())?;
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = if var > 0.0 { var.sqrt() } else { 1.0 };
        for (i, v) in values.into_iter().enumerate() {
            features[[i, j]] = (v - mean) / std;
        }
    }
    Ok(features)
}

/// Most frequent label; ties go to the label seen first.
pub fn majority_label(labels: &[u8]) -> Option<(u8, usize)> {
    let mut counts: HashMap<u8, (usize, usize)> = HashMap::new();
    for (pos, &label) in labels.iter().enumerate() {
        counts.entry(label).or_insert((0, pos)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
        .map(|(label, (count, _))| (label, count))
}

/// Breaststroke and butterfly votes stand. Backstroke and freestyle look
/// alike to the classifier, so the dive kick decides: a mean directed knee
/// angle above 180 degrees means the swimmer was on their back.
pub fn resolve_style(
    majority: u8,
    mean_kick_angle_deg: Option<f64>,
) -> Result<StrokeStyle, SwimError> {
    match StrokeStyle::from_label(majority) {
        Some(StrokeStyle::Breaststroke) => Ok(StrokeStyle::Breaststroke),
        Some(StrokeStyle::Butterfly) => Ok(StrokeStyle::Butterfly),
        Some(_) => Ok(match mean_kick_angle_deg {
            Some(angle) if angle > BACKSTROKE_KICK_ANGLE_DEG => StrokeStyle::Backstroke,
            _ => StrokeStyle::Freestyle,
        }),
        None => Err(SwimError::Classifier(format!(
            "label {majority} is not a stroke style"
        ))),
    }
}

/// Classifies the swimming stretch and applies the dive-kick override.
pub fn classify_style(
    series: &CleanedSeries,
    dive: Interval,
    swimming: Interval,
    classifier: &dyn StrokeClassifier,
) -> Result<StyleDecision, SwimError> {
    let mean_kick = mean_signed_kick_angle(series, dive)?;
    let features = swimming_features(series, swimming)?;
    if features.nrows() == 0 {
        return Err(SwimError::InsufficientData(format!(
            "no frames in swimming stretch {swimming}"
        )));
    }
    let labels = classifier.predict(features.view())?;
    if labels.len() != features.nrows() {
        return Err(SwimError::Classifier(format!(
            "classifier returned {} labels for {} frames of {swimming}",
            labels.len(),
            features.nrows()
        )));
    }
    let (majority, votes) = majority_label(&labels)
        .ok_or_else(|| SwimError::Classifier("classifier returned no labels".into()))?;
    let style = resolve_style(majority, mean_kick)?;
    info!(%style, majority, votes, mean_kick = ?mean_kick, "stroke style resolved");
    Ok(StyleDecision {
        style,
        majority_label: Some(majority),
        votes,
        mean_kick_angle_deg: mean_kick,
    })
}
