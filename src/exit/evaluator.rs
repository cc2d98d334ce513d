// =============================================================================
// Exit rule composition (§4.5) — a pure function, no side effects. Takes a
// position snapshot and external context, returns at most one decision per
// call. Priority order is fixed: stop-loss, mirror-exit, trailing-stop,
// scaling-out. Grounded on the teacher's `exit/triple_barrier.rs::evaluate`
// shape (progressive rule checks against one state struct) and
// `exit/micro_trail.rs` (trailing arm/trigger), generalized to statelessness
// since the strategy snapshot and position now carry everything needed.
// =============================================================================

use crate::domain::{ExitReason, Position};

/// External facts the evaluator needs but the position doesn't carry
/// itself — currently just whether a mirror-sell has been observed for
/// this wallet/token pair since the position opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitContext {
    pub mirror_sell_observed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub reason: ExitReason,
    pub amount: f64,
}

/// Evaluates `position` against its own `exit_strategy_snapshot` and
/// returns the single highest-priority exit action due right now, if any
/// (§4.5, resolving Open Question 2: stop-loss is checked before
/// mirror-exit).
pub fn evaluate(position: &Position, ctx: &ExitContext) -> Option<ExitDecision> {
    let strategy = &position.exit_strategy_snapshot;
    let pnl_pct = position.pnl_pct();

    if let Some(stop_loss_pct) = strategy.stop_loss_pct {
        if pnl_pct <= -stop_loss_pct {
            return Some(ExitDecision { reason: ExitReason::StopLoss, amount: position.current_amount });
        }
    }

    if strategy.mirror_exit && ctx.mirror_sell_observed {
        return Some(ExitDecision { reason: ExitReason::MirrorExit, amount: position.current_amount });
    }

    if let (Some(trail_pct), Some(activation_pct)) =
        (strategy.trailing_stop_pct, strategy.trailing_activation_pct)
    {
        if position.peak_pnl_pct() >= activation_pct {
            let drawdown_from_peak_pct =
                (position.peak_price - position.current_price) / position.peak_price * 100.0;
            if drawdown_from_peak_pct >= trail_pct {
                return Some(ExitDecision {
                    reason: ExitReason::TrailingStop,
                    amount: position.current_amount,
                });
            }
        }
    }

    // Scaling levels are ordered ascending by trigger_pct (validated at
    // `ExitStrategy::new`). Only the lowest un-hit level fires per tick —
    // a mark that jumps past two levels at once gets the second on the
    // next call (Open Question 1).
    for (k, level) in strategy.scaling_levels.iter().enumerate() {
        let k = k as u8;
        if position.scaling_level_hit(k) {
            continue;
        }
        if pnl_pct >= level.trigger_pct {
            let amount = (level.fraction_of_original * position.entry_amount).min(position.current_amount);
            return Some(ExitDecision { reason: ExitReason::ScalingOut(k), amount });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::ScalingLevel;
    use crate::domain::wallet::AccountMode;
    use crate::domain::{StrategyId, WalletId};
    use crate::domain::strategy::ExitStrategy;

    fn strategy(
        stop_loss_pct: Option<f64>,
        trailing_stop_pct: Option<f64>,
        trailing_activation_pct: Option<f64>,
        scaling_levels: Vec<ScalingLevel>,
        mirror_exit: bool,
    ) -> ExitStrategy {
        ExitStrategy::new(
            StrategyId::new(),
            "t".into(),
            stop_loss_pct,
            trailing_stop_pct,
            trailing_activation_pct,
            scaling_levels,
            mirror_exit,
        )
        .unwrap()
    }

    fn position(strategy: ExitStrategy) -> Position {
        Position::open(WalletId::new(), "T1".into(), AccountMode::Simulation, 100.0, 10.0, strategy)
    }

    #[test]
    fn stop_loss_fires_before_mirror_exit() {
        let mut p = position(strategy(Some(10.0), None, None, vec![], true));
        p.apply_mark(85.0); // -15%, past both triggers
        let ctx = ExitContext { mirror_sell_observed: true };
        let decision = evaluate(&p, &ctx).unwrap();
        assert_eq!(decision.reason, ExitReason::StopLoss);
    }

    #[test]
    fn mirror_exit_fires_when_no_stop_loss_hit() {
        let mut p = position(strategy(Some(10.0), None, None, vec![], true));
        p.apply_mark(98.0); // -2%, above stop-loss threshold
        let ctx = ExitContext { mirror_sell_observed: true };
        let decision = evaluate(&p, &ctx).unwrap();
        assert_eq!(decision.reason, ExitReason::MirrorExit);
    }

    #[test]
    fn trailing_stop_requires_activation_then_drawdown() {
        let mut p = position(strategy(None, Some(10.0), Some(15.0), vec![], false));
        let ctx = ExitContext::default();
        p.apply_mark(110.0); // +10%, below activation
        assert!(evaluate(&p, &ctx).is_none());
        p.apply_mark(120.0); // +20%, arms the trail (peak = 120)
        assert!(evaluate(&p, &ctx).is_none());
        p.apply_mark(106.0); // drawdown from peak = 11.7%, past 10%
        let decision = evaluate(&p, &ctx).unwrap();
        assert_eq!(decision.reason, ExitReason::TrailingStop);
    }

    #[test]
    fn scaling_out_emits_lowest_unhit_level_only() {
        let levels = vec![
            ScalingLevel { trigger_pct: 50.0, fraction_of_original: 0.3 },
            ScalingLevel { trigger_pct: 100.0, fraction_of_original: 0.3 },
        ];
        let mut p = position(strategy(None, None, None, levels, false));
        p.apply_mark(210.0); // +110%, past both levels at once
        let ctx = ExitContext::default();
        let decision = evaluate(&p, &ctx).unwrap();
        assert_eq!(decision.reason, ExitReason::ScalingOut(0));
        p.mark_scaling_level_hit(0);
        let decision2 = evaluate(&p, &ctx).unwrap();
        assert_eq!(decision2.reason, ExitReason::ScalingOut(1));
    }

    #[test]
    fn no_decision_when_nothing_triggered() {
        let mut p = position(strategy(Some(20.0), Some(10.0), Some(15.0), vec![], true));
        p.apply_mark(105.0);
        let ctx = ExitContext::default();
        assert!(evaluate(&p, &ctx).is_none());
    }
}
