//! Versioned decision policy: fusion weights, adaptive match threshold and
//! presence thresholds per tier.
//!
//! The shipped values were tuned by hand against sample captures; they are a
//! heuristic, not a measured false-accept rate.

use crate::types::MetricKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version stamped on every result produced with the built-in table.
pub const POLICY_VERSION: u32 = 1;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to parse policy table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid policy table: {0}")]
    Invalid(String),
    #[error("unknown policy tier '{0}' (expected lenient, standard or strict)")]
    UnknownTier(String),
}

/// How much evidence the caller demands; selects the presence threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    /// Live feedback while framing a capture.
    Lenient,
    /// Routine clock-in/out.
    #[default]
    Standard,
    /// Registration and other security-critical checks.
    Strict,
}

impl fmt::Display for PolicyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyTier::Lenient => "lenient",
            PolicyTier::Standard => "standard",
            PolicyTier::Strict => "strict",
        })
    }
}

impl FromStr for PolicyTier {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(PolicyTier::Lenient),
            "standard" => Ok(PolicyTier::Standard),
            "strict" => Ok(PolicyTier::Strict),
            other => Err(PolicyError::UnknownTier(other.to_string())),
        }
    }
}

/// Fusion weight per metric. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    pub pixel: f64,
    pub histogram: f64,
    pub edge: f64,
    pub structural: f64,
    pub features: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            pixel: 0.15,
            histogram: 0.20,
            edge: 0.20,
            structural: 0.25,
            features: 0.20,
        }
    }
}

impl MetricWeights {
    pub fn weight(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Pixel => self.pixel,
            MetricKind::Histogram => self.histogram,
            MetricKind::Edge => self.edge,
            MetricKind::Structural => self.structural,
            MetricKind::Features => self.features,
        }
    }

    /// Weights restricted to `present` and rescaled to sum to 1.
    ///
    /// Falls back to equal weights if every present metric carries zero weight.
    pub fn renormalized(&self, present: &[MetricKind]) -> Vec<(MetricKind, f64)> {
        let total: f64 = present.iter().map(|&k| self.weight(k)).sum();
        if total <= 0.0 {
            let equal = 1.0 / present.len().max(1) as f64;
            return present.iter().map(|&k| (k, equal)).collect();
        }
        present.iter().map(|&k| (k, self.weight(k) / total)).collect()
    }

    fn sum(&self) -> f64 {
        MetricKind::ALL.iter().map(|&k| self.weight(k)).sum()
    }
}

/// Three-tier adaptive match threshold keyed on decision confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub base: f64,
    /// Used when confidence is above `relax_above`.
    pub relaxed: f64,
    pub relax_above: f64,
    /// Used when confidence is below `tighten_below`.
    pub tightened: f64,
    pub tighten_below: f64,
}

impl Default for ThresholdRule {
    fn default() -> Self {
        Self {
            base: 0.60,
            relaxed: 0.55,
            relax_above: 80.0,
            tightened: 0.65,
            tighten_below: 65.0,
        }
    }
}

impl ThresholdRule {
    pub fn threshold_for(&self, confidence: f64) -> f64 {
        if confidence > self.relax_above {
            self.relaxed
        } else if confidence < self.tighten_below {
            self.tightened
        } else {
            self.base
        }
    }
}

/// Minimum presence confidence (0–100) per tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresenceThresholds {
    pub lenient: f64,
    pub standard: f64,
    pub strict: f64,
}

impl Default for PresenceThresholds {
    fn default() -> Self {
        Self {
            lenient: 35.0,
            standard: 50.0,
            strict: 60.0,
        }
    }
}

impl PresenceThresholds {
    pub fn for_tier(&self, tier: PolicyTier) -> f64 {
        match tier {
            PolicyTier::Lenient => self.lenient,
            PolicyTier::Standard => self.standard,
            PolicyTier::Strict => self.strict,
        }
    }
}

/// The complete decision table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub version: u32,
    #[serde(default)]
    pub weights: MetricWeights,
    #[serde(default)]
    pub threshold: ThresholdRule,
    #[serde(default)]
    pub presence: PresenceThresholds,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            version: POLICY_VERSION,
            weights: MetricWeights::default(),
            threshold: ThresholdRule::default(),
            presence: PresenceThresholds::default(),
        }
    }
}

impl PolicyTable {
    /// Parse and validate a TOML policy table. Omitted sections take the built-in values.
    pub fn from_toml_str(src: &str) -> Result<Self, PolicyError> {
        let table: PolicyTable = toml::from_str(src)?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for kind in MetricKind::ALL {
            let w = self.weights.weight(kind);
            if !w.is_finite() || w < 0.0 {
                return Err(PolicyError::Invalid(format!("weight for {kind} is {w}")));
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PolicyError::Invalid(format!("weights sum to {sum}, expected 1")));
        }

        let t = &self.threshold;
        for (name, value) in [
            ("base", t.base),
            ("relaxed", t.relaxed),
            ("tightened", t.tightened),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PolicyError::Invalid(format!(
                    "threshold {name} = {value} outside [0, 1]"
                )));
            }
        }
        if t.tighten_below > t.relax_above {
            return Err(PolicyError::Invalid(format!(
                "tighten_below ({}) exceeds relax_above ({})",
                t.tighten_below, t.relax_above
            )));
        }

        let p = &self.presence;
        for (name, value) in [
            ("lenient", p.lenient),
            ("standard", p.standard),
            ("strict", p.strict),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(PolicyError::Invalid(format!(
                    "presence {name} = {value} outside [0, 100]"
                )));
            }
        }
        Ok(())
    }

    pub fn presence_threshold(&self, tier: PolicyTier) -> f64 {
        self.presence.for_tier(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!(PolicyTable::default().validate().is_ok());
    }

    #[test]
    fn test_threshold_tiers() {
        let rule = ThresholdRule::default();
        assert_eq!(rule.threshold_for(95.0), 0.55);
        assert_eq!(rule.threshold_for(80.0), 0.60);
        assert_eq!(rule.threshold_for(70.0), 0.60);
        assert_eq!(rule.threshold_for(65.0), 0.60);
        assert_eq!(rule.threshold_for(64.9), 0.65);
    }

    #[test]
    fn test_renormalize_without_one_metric() {
        let weights = MetricWeights::default();
        let present = [
            MetricKind::Pixel,
            MetricKind::Histogram,
            MetricKind::Edge,
            MetricKind::Features,
        ];
        let renorm = weights.renormalized(&present);
        let sum: f64 = renorm.iter().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        // pixel: 0.15 / 0.75
        assert!((renorm[0].1 - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_renormalize_zero_weights_falls_back_to_equal() {
        let weights = MetricWeights {
            pixel: 0.0,
            histogram: 0.0,
            edge: 0.0,
            structural: 1.0,
            features: 0.0,
        };
        let renorm = weights.renormalized(&[MetricKind::Pixel, MetricKind::Edge]);
        assert_eq!(renorm, vec![(MetricKind::Pixel, 0.5), (MetricKind::Edge, 0.5)]);
    }

    #[test]
    fn test_presence_thresholds_rise_with_stakes() {
        let table = PolicyTable::default();
        let lenient = table.presence_threshold(PolicyTier::Lenient);
        let standard = table.presence_threshold(PolicyTier::Standard);
        let strict = table.presence_threshold(PolicyTier::Strict);
        assert!(lenient < standard);
        assert!(standard < strict);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("Strict".parse::<PolicyTier>().unwrap(), PolicyTier::Strict);
        assert!(matches!("paranoid".parse::<PolicyTier>(), Err(PolicyError::UnknownTier(_))));
    }

    #[test]
    fn test_from_toml_partial_override() {
        let table = PolicyTable::from_toml_str(
            r#"
            version = 7

            [presence]
            lenient = 30.0
            standard = 45.0
            strict = 55.0
            "#,
        )
        .unwrap();
        assert_eq!(table.version, 7);
        assert_eq!(table.presence.standard, 45.0);
        assert_eq!(table.weights, MetricWeights::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_weights() {
        let err = PolicyTable::from_toml_str(
            r#"
            version = 2

            [weights]
            pixel = 0.5
            histogram = 0.5
            edge = 0.5
            structural = 0.0
            features = 0.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
    }
}
