/// Condition evaluation.
///
/// Signal nodes carry [`ConditionExpr`] trees from the strategy
/// document; this module evaluates them against the data manager's
/// candle rings and LTP table. Operands that reference data not yet
/// available (a ring still warming up, an indicator column past the
/// history edge) evaluate to "not met", so signals simply keep watching.
use crate::data::DataManager;
use crate::indicators::sanitize_key;
use crate::models::strategy::{CompareOp, ConditionExpr, Operand, parse_timeframe};

/// What a condition sees: the market through the data manager, scoped
/// to the strategy's trading instrument.
pub struct ConditionCtx<'a> {
    /// Read access to candles, indicator columns, and LTP
    pub data: &'a DataManager,
    /// Canonical key of the trading instrument
    pub instrument: &'a str,
}

/// Evaluate a condition tree; unavailable data yields `false`.
pub fn evaluate(expr: &ConditionExpr, ctx: &ConditionCtx<'_>) -> bool {
    match expr {
        ConditionExpr::Compare { lhs, op, rhs } => compare(lhs, *op, rhs, ctx),
        ConditionExpr::All(children) => {
            !children.is_empty() && children.iter().all(|c| evaluate(c, ctx))
        }
        ConditionExpr::Any(children) => children.iter().any(|c| evaluate(c, ctx)),
        ConditionExpr::Not(inner) => !evaluate(inner, ctx),
    }
}

fn compare(lhs: &Operand, op: CompareOp, rhs: &Operand, ctx: &ConditionCtx<'_>) -> bool {
    let now = (operand(lhs, 0, ctx), operand(rhs, 0, ctx));
    let (Some(left), Some(right)) = now else {
        return false;
    };
    match op {
        CompareOp::Above => left > right,
        CompareOp::AtLeast => left >= right,
        CompareOp::Below => left < right,
        CompareOp::AtMost => left <= right,
        CompareOp::Equal => left == right,
        CompareOp::CrossesAbove => {
            let prev = (operand(lhs, 1, ctx), operand(rhs, 1, ctx));
            match prev {
                (Some(prev_left), Some(prev_right)) => prev_left <= prev_right && left > right,
                _ => false,
            }
        }
        CompareOp::CrossesBelow => {
            let prev = (operand(lhs, 1, ctx), operand(rhs, 1, ctx));
            match prev {
                (Some(prev_left), Some(prev_right)) => prev_left >= prev_right && left < right,
                _ => false,
            }
        }
    }
}

/// Operand value `shift` completed candles further back than the
/// operand's own offset. Constants and LTP ignore the shift, so cross
/// comparisons against them degenerate to plain comparisons on the
/// moving side.
fn operand(op: &Operand, shift: usize, ctx: &ConditionCtx<'_>) -> Option<f64> {
    match op {
        Operand::Const(value) => Some(*value),
        Operand::Ltp => ctx.data.ltp(ctx.instrument),
        Operand::Candle {
            timeframe,
            field,
            offset,
        } => {
            let minutes = parse_timeframe(timeframe).ok()?;
            ctx.data
                .candle_at(ctx.instrument, minutes, offset + shift)?
                .value(field)
        }
        Operand::Indicator {
            timeframe,
            key,
            column,
            offset,
        } => {
            let minutes = parse_timeframe(timeframe).ok()?;
            let name = match column {
                Some(suffix) => format!("{}_{suffix}", sanitize_key(key)),
                None => sanitize_key(key),
            };
            ctx.data
                .candle_at(ctx.instrument, minutes, offset + shift)?
                .value(&name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use crate::indicators::test_support;
    use crate::models::SecondTick;
    use crate::models::strategy::IndicatorDef;
    use crate::symbols::ScripCache;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::Arc;

    fn manager() -> DataManager {
        let mut store = MemoryDatastore::new();
        store.insert_candles("NIFTY", 1, test_support::candles(120));
        let mut dm = DataManager::new(
            Arc::new(store),
            Arc::new(ScripCache::new()),
            NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
        );
        let ema = crate::indicators::build(&IndicatorDef {
            indicator_name: "EMA".into(),
            timeperiod: Some(21),
            fast_period: None,
            slow_period: None,
            signal_period: None,
            std_dev: None,
        })
        .unwrap();
        dm.register_indicator("NIFTY", 1, ema);
        dm.initialize(&[("NIFTY".into(), 1)]).unwrap();
        dm.process_tick(&SecondTick::index(
            "NIFTY",
            NaiveDate::from_ymd_opt(2024, 10, 1)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
            25_800.0,
            25_800.0,
            25_800.0,
            25_800.0,
            10,
            0,
        ))
        .unwrap();
        dm
    }

    fn candle_close(offset: usize) -> Operand {
        Operand::Candle {
            timeframe: "1m".into(),
            field: "close".into(),
            offset,
        }
    }

    #[test]
    fn test_ltp_against_constant() {
        let dm = manager();
        let ctx = ConditionCtx {
            data: &dm,
            instrument: "NIFTY",
        };
        let expr = ConditionExpr::Compare {
            lhs: Operand::Ltp,
            op: CompareOp::Above,
            rhs: Operand::Const(25_000.0),
        };
        assert!(evaluate(&expr, &ctx));
    }

    #[test]
    fn test_candle_offset_comparison() {
        let dm = manager();
        let ctx = ConditionCtx {
            data: &dm,
            instrument: "NIFTY",
        };
        // close >= prev close, in whatever direction the fixture ran
        let rising = ConditionExpr::Compare {
            lhs: candle_close(0),
            op: CompareOp::AtLeast,
            rhs: candle_close(1),
        };
        let falling = ConditionExpr::Compare {
            lhs: candle_close(0),
            op: CompareOp::Below,
            rhs: candle_close(1),
        };
        assert_ne!(evaluate(&rising, &ctx), evaluate(&falling, &ctx));
    }

    #[test]
    fn test_indicator_column_lookup() {
        let dm = manager();
        let ctx = ConditionCtx {
            data: &dm,
            instrument: "NIFTY",
        };
        let expr = ConditionExpr::Compare {
            lhs: Operand::Indicator {
                timeframe: "1m".into(),
                key: "EMA(21)".into(),
                column: None,
                offset: 0,
            },
            op: CompareOp::Above,
            rhs: Operand::Const(0.0),
        };
        assert!(evaluate(&expr, &ctx));
    }

    #[test]
    fn test_missing_data_is_false_not_panic() {
        let dm = manager();
        let ctx = ConditionCtx {
            data: &dm,
            instrument: "NIFTY",
        };
        // Offset far past the ring
        let expr = ConditionExpr::Compare {
            lhs: candle_close(500),
            op: CompareOp::Above,
            rhs: Operand::Const(0.0),
        };
        assert!(!evaluate(&expr, &ctx));
        // Unknown indicator column
        let expr = ConditionExpr::Compare {
            lhs: Operand::Indicator {
                timeframe: "1m".into(),
                key: "RSI(14)".into(),
                column: None,
                offset: 0,
            },
            op: CompareOp::Above,
            rhs: Operand::Const(0.0),
        };
        assert!(!evaluate(&expr, &ctx));
    }

    #[test]
    fn test_composites() {
        let dm = manager();
        let ctx = ConditionCtx {
            data: &dm,
            instrument: "NIFTY",
        };
        let truth = ConditionExpr::Compare {
            lhs: Operand::Const(1.0),
            op: CompareOp::Above,
            rhs: Operand::Const(0.0),
        };
        let lie = ConditionExpr::Compare {
            lhs: Operand::Const(0.0),
            op: CompareOp::Above,
            rhs: Operand::Const(1.0),
        };
        assert!(evaluate(
            &ConditionExpr::All(vec![truth.clone(), truth.clone()]),
            &ctx
        ));
        assert!(!evaluate(
            &ConditionExpr::All(vec![truth.clone(), lie.clone()]),
            &ctx
        ));
        assert!(evaluate(
            &ConditionExpr::Any(vec![lie.clone(), truth.clone()]),
            &ctx
        ));
        assert!(!evaluate(&ConditionExpr::All(vec![]), &ctx));
        assert!(evaluate(&ConditionExpr::Not(Box::new(lie)), &ctx));
    }

    #[test]
    fn test_crosses_above_needs_previous_candle() {
        let dm = manager();
        let ctx = ConditionCtx {
            data: &dm,
            instrument: "NIFTY",
        };
        // Constant never crosses a constant
        let expr = ConditionExpr::Compare {
            lhs: Operand::Const(2.0),
            op: CompareOp::CrossesAbove,
            rhs: Operand::Const(1.0),
        };
        assert!(!evaluate(&expr, &ctx));
    }
}
