//! Dynamic interest rate curves
//!
//! Layer 1 maps a vault's collateral ratio to a multiplier on its asset's
//! base rate. Layer 2 (Recovery only) maps the system ratio to a
//! system-wide multiplier. Curves are short ordered marker arrays; between
//! markers the multiplier is interpolated, outside them it is clamped to
//! the nearest endpoint.

use ballast_core::Ratio;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
}

/// Multiplier at an absolute ratio level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateMarker {
    pub ratio: Ratio,
    pub multiplier: Ratio,
}

impl RateMarker {
    pub fn new(ratio: Ratio, multiplier: Ratio) -> Self {
        Self { ratio, multiplier }
    }
}

/// Markers strictly increasing in ratio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCurve {
    markers: Vec<RateMarker>,
    #[serde(default)]
    method: Interpolation,
}

impl RateCurve {
    pub fn new(markers: Vec<RateMarker>, method: Interpolation) -> Result<Self, ProtocolError> {
        if markers.is_empty() {
            return Err(ProtocolError::InvalidCurve("no markers".to_string()));
        }
        if markers.windows(2).any(|w| w[0].ratio >= w[1].ratio) {
            return Err(ProtocolError::InvalidCurve(
                "markers must be strictly increasing in ratio".to_string(),
            ));
        }
        Ok(Self { markers, method })
    }

    /// Sort by ratio and keep the first marker at each level
    fn from_unordered(mut markers: Vec<RateMarker>, method: Interpolation) -> Self {
        markers.sort_by(|a, b| a.ratio.cmp(&b.ratio));
        markers.dedup_by(|later, earlier| later.ratio == earlier.ratio);
        Self { markers, method }
    }

    pub fn markers(&self) -> &[RateMarker] {
        &self.markers
    }

    pub fn method(&self) -> Interpolation {
        self.method
    }

    pub fn multiplier_at(&self, ratio: Ratio) -> Ratio {
        let (first, last) = match (self.markers.first(), self.markers.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ratio::ONE,
        };

        if ratio <= first.ratio {
            return first.multiplier;
        }
        if ratio >= last.ratio {
            return last.multiplier;
        }

        for pair in self.markers.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if ratio <= hi.ratio {
                return match self.method {
                    Interpolation::Linear => lerp(lo, hi, ratio),
                };
            }
        }
        last.multiplier
    }
}

fn lerp(lo: RateMarker, hi: RateMarker, ratio: Ratio) -> Ratio {
    let span = hi.ratio.value() - lo.ratio.value();
    let t = (ratio.value() - lo.ratio.value()) / span;
    let m = lo.multiplier.value() + (hi.multiplier.value() - lo.multiplier.value()) * t;
    Ratio::new_unchecked(m.max(Decimal::ZERO))
}

/// Symbolic ratio level, resolved per asset or per system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NamedThreshold {
    LiquidationRatio,
    BorrowThreshold,
    WarningRatio,
    HealthyRatio,
}

/// Concrete values for the named thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdLevels {
    pub liquidation: Ratio,
    pub borrow: Ratio,
    pub warning: Ratio,
    pub healthy: Ratio,
}

impl ThresholdLevels {
    pub fn get(&self, threshold: NamedThreshold) -> Ratio {
        match threshold {
            NamedThreshold::LiquidationRatio => self.liquidation,
            NamedThreshold::BorrowThreshold => self.borrow,
            NamedThreshold::WarningRatio => self.warning,
            NamedThreshold::HealthyRatio => self.healthy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdMarker {
    pub threshold: NamedThreshold,
    pub multiplier: Ratio,
}

/// Curve keyed by named thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCurve {
    markers: Vec<ThresholdMarker>,
    #[serde(default)]
    method: Interpolation,
}

impl ThresholdCurve {
    pub fn new(markers: Vec<ThresholdMarker>, method: Interpolation) -> Result<Self, ProtocolError> {
        if markers.is_empty() {
            return Err(ProtocolError::InvalidCurve("no markers".to_string()));
        }
        let mut seen: Vec<NamedThreshold> = markers.iter().map(|m| m.threshold).collect();
        seen.sort();
        seen.dedup();
        if seen.len() != markers.len() {
            return Err(ProtocolError::InvalidCurve(
                "each threshold may appear once".to_string(),
            ));
        }
        Ok(Self { markers, method })
    }

    /// Per-vault layer: 3x at liquidation down to 1x at healthy
    pub fn default_global() -> Self {
        Self::from_pairs(&[
            (NamedThreshold::LiquidationRatio, Decimal::new(3, 0)),
            (NamedThreshold::BorrowThreshold, Decimal::new(2, 0)),
            (NamedThreshold::WarningRatio, Decimal::new(15, 1)),
            (NamedThreshold::HealthyRatio, Decimal::ONE),
        ])
    }

    /// System layer used in Recovery
    pub fn default_recovery() -> Self {
        Self::from_pairs(&[
            (NamedThreshold::LiquidationRatio, Decimal::new(2, 0)),
            (NamedThreshold::BorrowThreshold, Decimal::new(15, 1)),
            (NamedThreshold::WarningRatio, Decimal::new(125, 2)),
            (NamedThreshold::HealthyRatio, Decimal::ONE),
        ])
    }

    fn from_pairs(pairs: &[(NamedThreshold, Decimal)]) -> Self {
        Self {
            markers: pairs
                .iter()
                .map(|(threshold, m)| ThresholdMarker {
                    threshold: *threshold,
                    multiplier: Ratio::new_unchecked(*m),
                })
                .collect(),
            method: Interpolation::Linear,
        }
    }

    pub fn markers(&self) -> &[ThresholdMarker] {
        &self.markers
    }

    /// Resolve to absolute levels. Markers that land on the same level keep
    /// the first one in threshold order.
    pub fn resolve(&self, levels: &ThresholdLevels) -> RateCurve {
        let mut markers: Vec<ThresholdMarker> = self.markers.clone();
        markers.sort_by_key(|m| m.threshold);
        RateCurve::from_unordered(
            markers
                .into_iter()
                .map(|m| RateMarker::new(levels.get(m.threshold), m.multiplier))
                .collect(),
            self.method,
        )
    }
}
