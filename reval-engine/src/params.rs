//! Run parameters.
//!
//! Every struct deserializes from a partial JSON document: missing fields
//! take the defaults below. Out-of-range values are clamped by
//! `normalized()`, never rejected.

use serde::{Deserialize, Serialize};

use crate::error::RevalResult;
use crate::thresholds::PRETEST_MAX_WINDOW_WEEKS;

/// Direction used when snapping a plan price to a fixed cents ending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundDirection {
    #[default]
    Up,
    Down,
    Nearest,
}

/// Retail price-ending policy applied to plan prices before matching.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundingPolicy {
    pub enabled: bool,
    /// Target cents, 0..=99.
    pub round_value: i64,
    pub direction: RoundDirection,
}

impl Default for RoundingPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            round_value: 90,
            direction: RoundDirection::Up,
        }
    }
}

impl RoundingPolicy {
    pub fn normalized(self) -> Self {
        Self {
            round_value: self.round_value.clamp(0, 99),
            ..self
        }
    }

    /// Target fractional part, e.g. 0.90 for `round_value = 90`.
    pub fn target_fraction(&self) -> f64 {
        self.round_value.clamp(0, 99) as f64 / 100.0
    }
}

/// Parameters of the price-activation classifier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationParams {
    /// Price-match tolerance θ in percent.
    pub threshold_pct: f64,
    pub rounding: RoundingPolicy,
    /// Compute the change-week WAP from the first sale at the new price.
    pub smart_wap: bool,
    pub min_days_threshold: u32,
}

impl Default for ActivationParams {
    fn default() -> Self {
        Self {
            threshold_pct: 10.0,
            rounding: RoundingPolicy::default(),
            smart_wap: true,
            min_days_threshold: 3,
        }
    }
}

impl ActivationParams {
    pub fn normalized(self) -> Self {
        Self {
            threshold_pct: self.threshold_pct.max(0.0),
            rounding: self.rounding.normalized(),
            min_days_threshold: self.min_days_threshold.min(7),
            ..self
        }
    }
}

/// Parameters of the pre-test window search.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreTestParams {
    /// Number of baseline weeks N.
    pub weeks: usize,
    /// Minimum share of in-stock days per week τ, in percent.
    pub stock_threshold_pct: f64,
    pub contiguous: bool,
}

impl Default for PreTestParams {
    fn default() -> Self {
        Self {
            weeks: 3,
            stock_threshold_pct: 70.0,
            contiguous: true,
        }
    }
}

impl PreTestParams {
    pub fn normalized(self) -> Self {
        Self {
            weeks: self.weeks.clamp(1, PRETEST_MAX_WINDOW_WEEKS),
            stock_threshold_pct: self.stock_threshold_pct.max(0.0),
            ..self
        }
    }
}

/// What the uplift ratio compares against the baseline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualsMode {
    /// The current week's own revenue/profit.
    #[default]
    WeekValues,
    /// Mean over all valid test weeks elapsed so far.
    RunningAverage,
}

/// How weekly effects roll up into a product total.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalEffectMode {
    /// Sum of weekly absolute effects over valid weeks.
    #[default]
    WeeklySum,
    /// Last valid week's effect % times realized totals over valid weeks.
    LastWeekTimesTotal,
}

/// Parameters of the effect estimator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParams {
    pub pretest: PreTestParams,
    pub use_stock_filter: bool,
    /// A test week is excluded when its average stock drops more than this
    /// percentage below the baseline stock.
    pub stock_drop_threshold_pct: f64,
    /// Exclude weeks the classifier marks as mismatched. `None` disables it.
    pub activation: Option<ActivationParams>,
    pub actuals: ActualsMode,
    pub total_mode: TotalEffectMode,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            pretest: PreTestParams::default(),
            use_stock_filter: false,
            stock_drop_threshold_pct: 50.0,
            activation: Some(ActivationParams::default()),
            actuals: ActualsMode::WeekValues,
            total_mode: TotalEffectMode::WeeklySum,
        }
    }
}

impl EffectParams {
    pub fn normalized(self) -> Self {
        Self {
            pretest: self.pretest.normalized(),
            stock_drop_threshold_pct: self.stock_drop_threshold_pct.clamp(0.0, 100.0),
            activation: self.activation.map(ActivationParams::normalized),
            ..self
        }
    }

    /// Multiplier applied to the baseline stock to get the exclusion floor.
    pub fn stock_floor_factor(&self) -> f64 {
        1.0 - self.stock_drop_threshold_pct.clamp(0.0, 100.0) / 100.0
    }
}

/// Everything a full run needs; the shape of the `--params` file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub effect: EffectParams,
}

impl RunParams {
    /// Parse a (possibly partial) JSON parameter document.
    pub fn from_json(json: &str) -> RevalResult<Self> {
        let params: RunParams = serde_json::from_str(json)?;
        Ok(params.normalized())
    }

    pub fn normalized(self) -> Self {
        Self {
            effect: self.effect.normalized(),
        }
    }

    /// Activation parameters in force, falling back to defaults when the
    /// activation filter is disabled (reports still classify).
    pub fn activation(&self) -> ActivationParams {
        self.effect.activation.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_method() {
        let p = RunParams::default();
        let a = p.activation();
        assert_eq!(a.threshold_pct, 10.0);
        assert!(!a.rounding.enabled);
        assert_eq!(a.rounding.round_value, 90);
        assert_eq!(a.rounding.direction, RoundDirection::Up);
        assert!(a.smart_wap);
        assert_eq!(a.min_days_threshold, 3);
        assert_eq!(p.effect.pretest.weeks, 3);
        assert_eq!(p.effect.pretest.stock_threshold_pct, 70.0);
        assert!(p.effect.pretest.contiguous);
        assert_eq!(p.effect.actuals, ActualsMode::WeekValues);
        assert_eq!(p.effect.total_mode, TotalEffectMode::WeeklySum);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let json = r#"{
            "effect": {
                "use_stock_filter": true,
                "total_mode": "last_week_times_total",
                "activation": { "threshold_pct": 2.5, "rounding": { "enabled": true, "direction": "nearest" } }
            }
        }"#;
        let p = RunParams::from_json(json).unwrap();
        assert!(p.effect.use_stock_filter);
        assert_eq!(p.effect.total_mode, TotalEffectMode::LastWeekTimesTotal);
        let a = p.effect.activation.unwrap();
        assert_eq!(a.threshold_pct, 2.5);
        assert!(a.rounding.enabled);
        assert_eq!(a.rounding.round_value, 90);
        assert_eq!(a.rounding.direction, RoundDirection::Nearest);
        assert_eq!(p.effect.pretest.weeks, 3);
    }

    #[test]
    fn null_activation_disables_the_filter() {
        let p = RunParams::from_json(r#"{ "effect": { "activation": null } }"#).unwrap();
        assert!(p.effect.activation.is_none());
        assert_eq!(p.activation(), ActivationParams::default());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let json = r#"{
            "effect": {
                "stock_drop_threshold_pct": 140,
                "pretest": { "weeks": 0, "stock_threshold_pct": -5 },
                "activation": { "threshold_pct": -1, "rounding": { "round_value": 250 } }
            }
        }"#;
        let p = RunParams::from_json(json).unwrap();
        assert_eq!(p.effect.stock_drop_threshold_pct, 100.0);
        assert_eq!(p.effect.pretest.weeks, 1);
        assert_eq!(p.effect.pretest.stock_threshold_pct, 0.0);
        let a = p.effect.activation.unwrap();
        assert_eq!(a.threshold_pct, 0.0);
        assert_eq!(a.rounding.round_value, 99);
    }

    #[test]
    fn huge_pretest_window_is_clamped_to_the_lookback() {
        let p = RunParams::from_json(r#"{ "effect": { "pretest": { "weeks": 1099511627776, "contiguous": false } } }"#)
            .unwrap();
        assert_eq!(p.effect.pretest.weeks, PRETEST_MAX_WINDOW_WEEKS);
    }

    #[test]
    fn malformed_json_is_a_params_error() {
        let err = RunParams::from_json("{ not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid parameters"));
    }

    #[test]
    fn stock_floor_factor() {
        let p = EffectParams::default();
        assert!((p.stock_floor_factor() - 0.5).abs() < 1e-12);
    }
}
