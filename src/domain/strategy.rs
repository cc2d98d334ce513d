use serde::{Deserialize, Serialize};

use super::StrategyId;

/// One scaling-out rule: at `trigger_pct` profit, sell `fraction_of_original`
/// of the position's original `entry_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingLevel {
    pub trigger_pct: f64,
    pub fraction_of_original: f64,
}

/// An exit strategy template. Immutable once referenced by an open position
/// — positions capture a deep copy (`exit_strategy_snapshot`) at creation so
/// later edits here never reach an already-open trade (P8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitStrategy {
    pub id: StrategyId,
    pub name: String,
    pub stop_loss_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub trailing_activation_pct: Option<f64>,
    /// Ordered ascending by `trigger_pct`; validated at construction.
    pub scaling_levels: Vec<ScalingLevel>,
    pub mirror_exit: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("scaling level fractions sum to {0}, must be <= 1.0")]
    FractionsExceedOne(f64),
    #[error("scaling level triggers must be strictly increasing (found {0} after {1})")]
    TriggersNotIncreasing(f64, f64),
    #[error("trailing_stop_pct set without trailing_activation_pct")]
    MissingActivation,
}

impl ExitStrategy {
    pub fn new(
        id: StrategyId,
        name: String,
        stop_loss_pct: Option<f64>,
        trailing_stop_pct: Option<f64>,
        trailing_activation_pct: Option<f64>,
        scaling_levels: Vec<ScalingLevel>,
        mirror_exit: bool,
    ) -> Result<Self, StrategyError> {
        let sum: f64 = scaling_levels.iter().map(|l| l.fraction_of_original).sum();
        if sum > 1.0 + f64::EPSILON {
            return Err(StrategyError::FractionsExceedOne(sum));
        }
        let mut prev = f64::NEG_INFINITY;
        for level in &scaling_levels {
            if level.trigger_pct <= prev {
                return Err(StrategyError::TriggersNotIncreasing(level.trigger_pct, prev));
            }
            prev = level.trigger_pct;
        }
        if trailing_stop_pct.is_some() && trailing_activation_pct.is_none() {
            return Err(StrategyError::MissingActivation);
        }
        Ok(Self {
            id,
            name,
            stop_loss_pct,
            trailing_stop_pct,
            trailing_activation_pct,
            scaling_levels,
            mirror_exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_fractions_over_one() {
        let levels = vec![
            ScalingLevel { trigger_pct: 50.0, fraction_of_original: 0.6 },
            ScalingLevel { trigger_pct: 100.0, fraction_of_original: 0.6 },
        ];
        let err = ExitStrategy::new(StrategyId::new(), "t".into(), None, None, None, levels, false)
            .unwrap_err();
        assert!(matches!(err, StrategyError::FractionsExceedOne(_)));
    }

    #[test]
    fn rejects_non_increasing_triggers() {
        let levels = vec![
            ScalingLevel { trigger_pct: 100.0, fraction_of_original: 0.3 },
            ScalingLevel { trigger_pct: 100.0, fraction_of_original: 0.3 },
        ];
        let err = ExitStrategy::new(StrategyId::new(), "t".into(), None, None, None, levels, false)
            .unwrap_err();
        assert!(matches!(err, StrategyError::TriggersNotIncreasing(_, _)));
    }

    #[test]
    fn accepts_well_formed_strategy() {
        let levels = vec![ScalingLevel { trigger_pct: 100.0, fraction_of_original: 0.5 }];
        let strat = ExitStrategy::new(
            StrategyId::new(),
            "default".into(),
            Some(20.0),
            Some(10.0),
            Some(15.0),
            levels,
            true,
        )
        .unwrap();
        assert_eq!(strat.scaling_levels.len(), 1);
    }
}
