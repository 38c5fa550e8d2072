/// Strategy document model
///
/// The engine receives strategies as already-parsed graph documents: a
/// node list, an edge list, and a root `tradingInstrumentConfig` naming
/// the underlying, the exchange context, and the indicators required per
/// timeframe. This module is the serde surface for that document plus
/// the extraction helpers the data manager and node graph consume.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::order::{OrderSide, OrderType};

/// A complete strategy graph document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDocument {
    /// Human-readable strategy name
    #[serde(default)]
    pub strategy_name: Option<String>,
    /// Graph nodes
    pub nodes: Vec<NodeDef>,
    /// Directed edges (source activates target)
    pub edges: Vec<EdgeDef>,
}

/// One node of the strategy graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique node id
    pub id: String,
    /// Node type discriminator, e.g. `startNode`, `entrySignalNode`
    #[serde(rename = "type")]
    pub node_type: String,
    /// Type-specific configuration
    #[serde(default)]
    pub data: NodeData,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    /// Parent node id
    pub source: String,
    /// Child node id
    pub target: String,
}

/// Type-specific node configuration; unused fields stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeData {
    /// Display label
    pub label: Option<String>,
    /// Root instrument configuration (start node only)
    pub trading_instrument_config: Option<TradingInstrumentConfig>,
    /// Boolean condition tree (signal nodes)
    pub conditions: Option<ConditionExpr>,
    /// Order configuration (entry and exit nodes)
    pub order_config: Option<OrderConfig>,
    /// Re-entry configuration (re-entry signal nodes)
    pub re_entry_config: Option<ReEntryConfig>,
    /// Square-off end conditions
    pub end_conditions: Option<EndConditions>,
}

/// The root instrument configuration carried by the start node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingInstrumentConfig {
    /// Underlying index, e.g. `NIFTY`
    pub underlying: String,
    /// Exchange context for session times, defaults to NSE
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Per-timeframe indicator requirements
    #[serde(default)]
    pub timeframes: Vec<TimeframeConfig>,
}

fn default_exchange() -> String {
    "NSE".to_string()
}

/// Indicators required on one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeConfig {
    /// Timeframe literal, e.g. `1m`, `5m`, `1h`
    pub timeframe: String,
    /// Indicator definitions keyed by an arbitrary document-side id
    #[serde(default)]
    pub indicators: BTreeMap<String, IndicatorDef>,
}

/// One indicator requirement from the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDef {
    /// Indicator name, case-insensitive (`ema`, `rsi`, `macd`, ...)
    pub indicator_name: String,
    /// Primary period for single-period indicators
    #[serde(default)]
    pub timeperiod: Option<u32>,
    /// Fast period (MACD)
    #[serde(default)]
    pub fast_period: Option<u32>,
    /// Slow period (MACD)
    #[serde(default)]
    pub slow_period: Option<u32>,
    /// Signal period (MACD)
    #[serde(default)]
    pub signal_period: Option<u32>,
    /// Standard-deviation multiplier (Bollinger bands)
    #[serde(default)]
    pub std_dev: Option<f64>,
}

/// Order configuration for entry and exit nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfig {
    /// Trade target: an option pattern (`TI:W0:ATM:CE`), a canonical
    /// symbol, or the bare underlying. Exit nodes leave this unset and
    /// derive the symbol from the target position.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Quantity in units
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    /// Order direction (entries only; exits always take the opposite of
    /// the position side)
    #[serde(default)]
    pub side: Option<OrderSide>,
    /// Market or limit
    #[serde(default)]
    pub order_type: OrderType,
    /// Product type forwarded to the broker
    #[serde(default = "default_product_type")]
    pub product_type: String,
    /// Exchange segment for order routing
    #[serde(default = "default_order_exchange")]
    pub exchange: String,
    /// Exact position to close (exit nodes); `None` closes all open
    #[serde(default)]
    pub target_position_vpi: Option<String>,
}

fn default_quantity() -> i64 {
    1
}

fn default_product_type() -> String {
    "INTRADAY".to_string()
}

fn default_order_exchange() -> String {
    "NFO".to_string()
}

/// Re-entry signal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReEntryConfig {
    /// Maximum number of re-entries permitted on the lineage
    pub max_re_entries: u32,
}

/// Square-off end conditions, evaluated in fixed priority order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndConditions {
    /// Fire as soon as a parent activates the node
    pub immediate_exit: Toggle,
    /// Fire on daily P&L crossing a profit target or loss limit
    pub performance_based_exit: PerformanceExit,
    /// Fire at a wall-clock time or N minutes before close
    pub time_based_exit: TimeExit,
}

/// A bare enabled/disabled switch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Toggle {
    /// Whether the condition participates
    pub enabled: bool,
}

/// Performance-based square-off thresholds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceExit {
    /// Whether the condition participates
    pub enabled: bool,
    /// Close everything once day P&L ≥ this
    pub profit_target: Option<f64>,
    /// Close everything once day P&L ≤ −this
    pub loss_limit: Option<f64>,
}

/// Time-based square-off trigger. `time` and `minutes_before_close` are
/// mutually exclusive; `time` wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeExit {
    /// Whether the condition participates
    pub enabled: bool,
    /// Absolute trigger time `HH:MM:SS`
    pub time: Option<String>,
    /// Trigger N minutes before market close
    pub minutes_before_close: Option<i64>,
}

/// A boolean condition tree evaluated against candles and LTP.
///
/// This is pure data; evaluation lives in the graph scheduler so the
/// document model stays behavior-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionExpr {
    /// Binary comparison between two operands
    Compare {
        /// Left-hand operand
        lhs: Operand,
        /// Comparison operator
        op: CompareOp,
        /// Right-hand operand
        rhs: Operand,
    },
    /// True when every child is true
    All(Vec<ConditionExpr>),
    /// True when any child is true
    Any(Vec<ConditionExpr>),
    /// Negation
    Not(Box<ConditionExpr>),
}

/// Comparison operators, including the cross variants which consult the
/// previous candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    /// `lhs > rhs`
    Above,
    /// `lhs >= rhs`
    AtLeast,
    /// `lhs < rhs`
    Below,
    /// `lhs <= rhs`
    AtMost,
    /// `lhs == rhs` (exact)
    Equal,
    /// Was `<=` on the previous candle and is `>` now
    CrossesAbove,
    /// Was `>=` on the previous candle and is `<` now
    CrossesBelow,
}

/// A value reference inside a condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operand {
    /// A literal number
    Const(f64),
    /// Last traded price of the trading instrument
    Ltp,
    /// A candle field at a timeframe, `offset` candles back (0 = latest)
    Candle {
        /// Timeframe literal, e.g. `1m`
        timeframe: String,
        /// `open`, `high`, `low`, `close`, or `volume`
        field: String,
        /// How many completed candles back (0 = latest)
        #[serde(default)]
        offset: usize,
    },
    /// An indicator column at a timeframe, `offset` candles back
    Indicator {
        /// Timeframe literal, e.g. `5m`
        timeframe: String,
        /// Indicator key in function form, e.g. `EMA(21)`
        key: String,
        /// Output column for multi-column indicators (`macd`, `signal`,
        /// `hist`, `upper`, `middle`, `lower`); unset for single-column
        #[serde(default)]
        column: Option<String>,
        /// How many completed candles back (0 = latest)
        #[serde(default)]
        offset: usize,
    },
}

/// Parse a timeframe literal (`1m`, `15m`, `1h`, `1d`) into whole minutes.
pub fn parse_timeframe(timeframe: &str) -> Result<u32> {
    let tf = timeframe.trim().to_ascii_lowercase();
    let (digits, unit) = tf.split_at(tf.len().saturating_sub(1));
    let n: u32 = digits
        .parse()
        .map_err(|_| EngineError::document(format!("invalid timeframe '{timeframe}'")))?;
    let minutes = match unit {
        "m" => n,
        "h" => n * 60,
        "d" => n * 1440,
        _ => {
            return Err(EngineError::document(format!(
                "invalid timeframe '{timeframe}'"
            )));
        }
    };
    if minutes == 0 {
        return Err(EngineError::document(format!(
            "invalid timeframe '{timeframe}'"
        )));
    }
    Ok(minutes)
}

impl StrategyDocument {
    /// Parse a document from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The root instrument configuration (held by the start node).
    pub fn trading_config(&self) -> Result<&TradingInstrumentConfig> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.node_type.as_str(), "startNode" | "start"))
            .find_map(|n| n.data.trading_instrument_config.as_ref())
            .ok_or_else(|| {
                EngineError::document("no startNode with tradingInstrumentConfig found")
            })
    }

    /// Distinct timeframes (in minutes) referenced by the document:
    /// the instrument config plus every condition operand.
    pub fn timeframes(&self) -> Result<Vec<u32>> {
        let mut minutes: Vec<u32> = Vec::new();
        let config = self.trading_config()?;
        for tf in &config.timeframes {
            minutes.push(parse_timeframe(&tf.timeframe)?);
        }
        for node in &self.nodes {
            if let Some(expr) = &node.data.conditions {
                collect_condition_timeframes(expr, &mut minutes)?;
            }
        }
        minutes.sort_unstable();
        minutes.dedup();
        if minutes.is_empty() {
            minutes.push(1);
        }
        Ok(minutes)
    }

    /// Option pattern strings referenced by entry-node order configs.
    pub fn option_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| matches!(n.node_type.as_str(), "entryNode" | "entry"))
            .filter_map(|n| n.data.order_config.as_ref())
            .filter_map(|cfg| cfg.symbol.clone())
            .filter(|s| crate::options::OptionPattern::is_pattern(s))
            .collect();
        patterns.sort();
        patterns.dedup();
        patterns
    }
}

fn collect_condition_timeframes(expr: &ConditionExpr, out: &mut Vec<u32>) -> Result<()> {
    match expr {
        ConditionExpr::Compare { lhs, rhs, .. } => {
            for operand in [lhs, rhs] {
                if let Operand::Candle { timeframe, .. } | Operand::Indicator { timeframe, .. } =
                    operand
                {
                    out.push(parse_timeframe(timeframe)?);
                }
            }
        }
        ConditionExpr::All(children) | ConditionExpr::Any(children) => {
            for child in children {
                collect_condition_timeframes(child, out)?;
            }
        }
        ConditionExpr::Not(inner) => collect_condition_timeframes(inner, out)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeframe() {
        assert_eq!(parse_timeframe("1m").unwrap(), 1);
        assert_eq!(parse_timeframe("15m").unwrap(), 15);
        assert_eq!(parse_timeframe("1h").unwrap(), 60);
        assert_eq!(parse_timeframe("1d").unwrap(), 1440);
        assert!(parse_timeframe("0m").is_err());
        assert!(parse_timeframe("5x").is_err());
        assert!(parse_timeframe("m").is_err());
    }

    #[test]
    fn test_document_round_trip() {
        let json = r#"{
            "strategyName": "ema-pullback",
            "nodes": [
                {
                    "id": "start-1",
                    "type": "startNode",
                    "data": {
                        "tradingInstrumentConfig": {
                            "underlying": "NIFTY",
                            "timeframes": [
                                {
                                    "timeframe": "1m",
                                    "indicators": {
                                        "ind-1": {"indicatorName": "EMA", "timeperiod": 21}
                                    }
                                }
                            ]
                        }
                    }
                },
                {
                    "id": "sig-1",
                    "type": "entrySignalNode",
                    "data": {
                        "conditions": {
                            "compare": {
                                "lhs": {"candle": {"timeframe": "1m", "field": "close"}},
                                "op": "atLeast",
                                "rhs": {"candle": {"timeframe": "1m", "field": "close", "offset": 1}}
                            }
                        }
                    }
                },
                {
                    "id": "entry-1",
                    "type": "entryNode",
                    "data": {
                        "orderConfig": {
                            "symbol": "TI:W0:ATM:CE",
                            "quantity": 50,
                            "side": "BUY"
                        }
                    }
                }
            ],
            "edges": [
                {"source": "start-1", "target": "sig-1"},
                {"source": "sig-1", "target": "entry-1"}
            ]
        }"#;
        let doc = StrategyDocument::from_json(json).unwrap();
        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(doc.trading_config().unwrap().underlying, "NIFTY");
        assert_eq!(doc.timeframes().unwrap(), vec![1]);
        assert_eq!(doc.option_patterns(), vec!["TI:W0:ATM:CE".to_string()]);
    }

    #[test]
    fn test_missing_start_node_is_an_error() {
        let doc = StrategyDocument {
            strategy_name: None,
            nodes: vec![],
            edges: vec![],
        };
        assert!(doc.trading_config().is_err());
    }
}
