/// Per-tick graph scheduler.
///
/// One cycle per tick batch: reset every node's visited flag, terminate
/// when the whole graph has drained to Inactive (force-closing any
/// straggler positions), otherwise walk the graph from the start node.
/// A node executes its kind-specific logic at most once per cycle; on
/// completion it deactivates itself and activates its children in edge
/// order, executing them within the same cycle. Nodes waiting on order
/// fills sit in Pending and are polled, never re-placed.
use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use tracing::{debug, info, warn};

use crate::data::DataManager;
use crate::error::{EngineError, Result};
use crate::models::{OrderRequest, OrderStatus};
use crate::options::OptionUniverse;
use crate::orders::OrderPlacer;
use crate::positions::{EntryData, ExitRecord, PositionStore};

use super::condition::{ConditionCtx, evaluate};
use super::node::{
    EntryConfig, EntryTarget, ExitConfig, Node, NodeGraph, NodeId, NodeKind, NodeState, NodeStatus,
};
use crate::models::strategy::EndConditions;

/// Everything a cycle needs from the engine.
pub struct CycleCtx<'a> {
    /// Market state (candles, LTP, option loading)
    pub data: &'a mut DataManager,
    /// Pattern resolution and the subscription cache
    pub universe: &'a mut OptionUniverse,
    /// The position store
    pub positions: &'a mut PositionStore,
    /// Order placement boundary
    pub orders: &'a mut dyn OrderPlacer,
    /// Timestamp of the tick batch driving this cycle
    pub now: NaiveDateTime,
    /// Market close for the backtest day (time-based square-off)
    pub market_close: NaiveDateTime,
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The graph still has non-inactive nodes
    Running,
    /// Every node drained to Inactive; the run is over
    Terminated,
}

/// What a node's logic decided.
struct LogicResult {
    completed: bool,
    activate_children: bool,
}

impl LogicResult {
    fn completed() -> Self {
        Self {
            completed: true,
            activate_children: true,
        }
    }

    fn completed_without_children() -> Self {
        Self {
            completed: true,
            activate_children: false,
        }
    }

    fn not_yet() -> Self {
        Self {
            completed: false,
            activate_children: false,
        }
    }
}

/// The exit-signal attribution carried to the next exit fill.
#[derive(Debug, Clone)]
struct ExitTrigger {
    node_id: NodeId,
    price: Option<f64>,
}

/// Mutable run state of the whole graph.
struct FlowState {
    states: std::collections::HashMap<NodeId, NodeState>,
    instrument: String,
    square_off_executed: bool,
    strategy_ended: bool,
    last_entry_tick: Option<NaiveDateTime>,
    last_exit_trigger: Option<ExitTrigger>,
}

impl FlowState {
    fn state(&self, id: &str) -> &NodeState {
        self.states.get(id).expect("state exists for every node")
    }

    fn state_mut(&mut self, id: &str) -> &mut NodeState {
        self.states.get_mut(id).expect("state exists for every node")
    }
}

/// Drives the node graph, one cycle per tick batch.
pub struct Scheduler {
    graph: NodeGraph,
    flow: FlowState,
    terminated: bool,
}

impl Scheduler {
    /// Create a scheduler with only the start node active.
    pub fn new(graph: NodeGraph, instrument: impl Into<String>) -> Self {
        let states = graph.initial_states();
        Self {
            graph,
            flow: FlowState {
                states,
                instrument: instrument.into(),
                square_off_executed: false,
                strategy_ended: false,
                last_entry_tick: None,
                last_exit_trigger: None,
            },
            terminated: false,
        }
    }

    /// Whether a square-off (or drain) already ended the strategy.
    pub fn strategy_ended(&self) -> bool {
        self.flow.strategy_ended
    }

    /// Whether the run has terminated.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Current status of a node.
    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.flow.states.get(id).map(|s| s.status)
    }

    /// Current lineage counter of a node.
    pub fn re_entry_num(&self, id: &str) -> Option<u32> {
        self.flow.states.get(id).map(|s| s.re_entry_num)
    }

    /// Run one cycle against the current market snapshot.
    pub fn cycle(&mut self, ctx: &mut CycleCtx<'_>) -> Result<CycleOutcome> {
        if self.terminated {
            return Ok(CycleOutcome::Terminated);
        }

        for state in self.flow.states.values_mut() {
            state.visited = false;
        }

        let all_inactive = self
            .flow
            .states
            .values()
            .all(|s| s.status == NodeStatus::Inactive);
        if all_inactive {
            self.force_close_open_positions(ctx);
            self.terminated = true;
            self.flow.strategy_ended = true;
            info!(now = %ctx.now, "all nodes inactive; run terminated");
            return Ok(CycleOutcome::Terminated);
        }

        let start = self.graph.start_id().clone();
        let mut traversed = HashSet::new();
        run_node(&self.graph, &mut self.flow, ctx, &start, &mut traversed, true)?;
        Ok(CycleOutcome::Running)
    }

    /// Last-resort close when the graph drains with positions still
    /// open (no square-off fired): synthetic exits at last known price.
    fn force_close_open_positions(&mut self, ctx: &mut CycleCtx<'_>) {
        let spot = ctx.data.ltp(&self.flow.instrument);
        for vpi in ctx.positions.open_position_ids() {
            let Some(position) = ctx.positions.get(&vpi) else {
                continue;
            };
            let price = ctx
                .data
                .ltp(&position.symbol)
                .unwrap_or(position.current_price);
            let re_entry_num = position.re_entry_num;
            warn!(%vpi, price, "graph drained with open position; forcing close");
            ctx.positions.close_position(
                &vpi,
                ExitRecord {
                    node_id: self.graph.start_id().clone(),
                    price,
                    time: ctx.now,
                    reason: "forced_square_off".into(),
                    trigger_node_id: None,
                    re_entry_num,
                    spot,
                },
            );
        }
    }
}

/// Walk one node: execute if eligible, then recurse.
///
/// `forced` marks a call that follows an explicit activation (the child
/// must be walked again even if the traversal already passed it); plain
/// pass-through visits each node once per cycle.
fn run_node(
    graph: &NodeGraph,
    flow: &mut FlowState,
    ctx: &mut CycleCtx<'_>,
    id: &NodeId,
    traversed: &mut HashSet<NodeId>,
    forced: bool,
) -> Result<()> {
    if flow.strategy_ended {
        return Ok(());
    }
    if !traversed.insert(id.clone()) && !forced {
        return Ok(());
    }
    let Some(node) = graph.get(id) else {
        warn!(%id, "edge to unknown node; skipping");
        return Ok(());
    };

    let snapshot = flow.state(id).clone();
    let mut completed = false;
    let mut activate_children = false;

    if !snapshot.visited && snapshot.status != NodeStatus::Inactive {
        flow.state_mut(id).visited = true;
        let result = node_logic(flow, ctx, node)?;
        if result.completed {
            flow.state_mut(id).status = NodeStatus::Inactive;
            completed = true;
            activate_children = result.activate_children;
        }
    }

    if flow.strategy_ended {
        return Ok(());
    }

    if completed && activate_children {
        let parent_re = flow.state(id).re_entry_num;
        for child in &node.children {
            if flow.strategy_ended {
                break;
            }
            let Some(child_state) = flow.states.get_mut(child) else {
                continue;
            };
            child_state.status = NodeStatus::Active;
            child_state.re_entry_num = child_state.re_entry_num.max(parent_re);
            child_state.visited = false;
            debug!(parent = %id, %child, re_entry_num = parent_re, "activated child");
            run_node(graph, flow, ctx, child, traversed, true)?;
        }
    } else {
        for child in &node.children {
            if flow.strategy_ended {
                break;
            }
            run_node(graph, flow, ctx, child, traversed, false)?;
        }
    }
    Ok(())
}

fn node_logic(flow: &mut FlowState, ctx: &mut CycleCtx<'_>, node: &Node) -> Result<LogicResult> {
    match &node.kind {
        NodeKind::Start => Ok(LogicResult::completed()),
        NodeKind::EntrySignal { conditions } => {
            let met = evaluate(
                conditions,
                &ConditionCtx {
                    data: ctx.data,
                    instrument: &flow.instrument,
                },
            );
            if met {
                info!(node = %node.id, now = %ctx.now, "entry signal fired");
                Ok(LogicResult::completed())
            } else {
                Ok(LogicResult::not_yet())
            }
        }
        NodeKind::ExitSignal { conditions } => {
            let met = evaluate(
                conditions,
                &ConditionCtx {
                    data: ctx.data,
                    instrument: &flow.instrument,
                },
            );
            if met {
                info!(node = %node.id, now = %ctx.now, "exit signal fired");
                flow.last_exit_trigger = Some(ExitTrigger {
                    node_id: node.id.clone(),
                    price: ctx.data.ltp(&flow.instrument),
                });
                Ok(LogicResult::completed())
            } else {
                Ok(LogicResult::not_yet())
            }
        }
        NodeKind::ReEntrySignal {
            conditions,
            max_re_entries,
        } => {
            if let Some(expr) = conditions {
                let met = evaluate(
                    expr,
                    &ConditionCtx {
                        data: ctx.data,
                        instrument: &flow.instrument,
                    },
                );
                if !met {
                    return Ok(LogicResult::not_yet());
                }
            }
            let state = flow.state_mut(&node.id);
            let carried = state.re_entry_num + 1;
            if carried > *max_re_entries {
                info!(
                    node = %node.id,
                    cap = *max_re_entries,
                    "re-entry cap reached; lineage ends here"
                );
                return Ok(LogicResult::completed_without_children());
            }
            state.re_entry_num = carried;
            info!(node = %node.id, re_entry_num = carried, "re-entry signal fired");
            Ok(LogicResult::completed())
        }
        NodeKind::Entry { config } => entry_logic(flow, ctx, node, config),
        NodeKind::Exit { config } => exit_logic(flow, ctx, node, config),
        NodeKind::SquareOff { end_conditions } => {
            square_off_logic(flow, ctx, node, end_conditions)
        }
    }
}

fn entry_logic(
    flow: &mut FlowState,
    ctx: &mut CycleCtx<'_>,
    node: &Node,
    config: &EntryConfig,
) -> Result<LogicResult> {
    let snapshot = flow.state(&node.id).clone();

    // A pending order is polled, never re-placed
    if let Some(order_id) = &snapshot.pending_order_id {
        let record = ctx.orders.get_order_status(order_id, true)?;
        return match record.status {
            OrderStatus::Complete => {
                let symbol = snapshot
                    .pending_target
                    .clone()
                    .unwrap_or_else(|| flow.instrument.clone());
                open_position_from_fill(
                    flow,
                    ctx,
                    node,
                    symbol,
                    record.average_price,
                    record.completed_at.unwrap_or(ctx.now),
                    config,
                    &snapshot,
                );
                let state = flow.state_mut(&node.id);
                state.pending_order_id = None;
                state.pending_target = None;
                Ok(LogicResult::completed())
            }
            status if status.is_terminal_failure() => {
                warn!(
                    node = %node.id,
                    %order_id,
                    reason = record.rejection_reason.as_deref().unwrap_or("unknown"),
                    re_entry_num = snapshot.re_entry_num,
                    "entry order rejected; node deactivates without retry (check the broker account in live mode)"
                );
                let state = flow.state_mut(&node.id);
                state.pending_order_id = None;
                state.pending_target = None;
                Ok(LogicResult::completed_without_children())
            }
            _ => Ok(LogicResult::not_yet()),
        };
    }

    // Resolve the target and stream it if it is an option pattern
    let spot = ctx.data.ltp(&flow.instrument);
    let (symbol_key, streamed_ltp) = match &config.target {
        EntryTarget::Pattern(pattern) => {
            let spot = spot.ok_or_else(|| {
                EngineError::data_integrity(
                    ctx.now,
                    format!(
                        "no spot for '{}' while resolving pattern {}",
                        flow.instrument,
                        pattern.key()
                    ),
                )
            })?;
            let symbol = ctx.universe.resolve_for_entry(pattern, spot, ctx.now)?;
            let first_ltp = ctx.data.load_option_contract(&symbol, ctx.now)?;
            (symbol.key(), first_ltp)
        }
        EntryTarget::Symbol(raw) => (raw.clone(), None),
    };

    let price = streamed_ltp
        .or_else(|| ctx.data.ltp(&symbol_key))
        .or(spot)
        .ok_or_else(|| {
            EngineError::data_integrity(
                ctx.now,
                format!("no price available for entry target '{symbol_key}'"),
            )
        })?;

    let request = OrderRequest {
        symbol: symbol_key.clone(),
        exchange: config.exchange.clone(),
        side: config.side,
        quantity: config.quantity,
        order_type: config.order_type,
        product_type: config.product_type.clone(),
        price: Some(price),
    };
    let record = ctx.orders.place_order(&request, ctx.now)?;
    info!(
        node = %node.id,
        symbol = %symbol_key,
        side = %config.side,
        quantity = config.quantity,
        order_id = %record.order_id,
        "entry order placed"
    );

    {
        let state = flow.state_mut(&node.id);
        state.status = NodeStatus::Pending;
        state.pending_order_id = Some(record.order_id.clone());
        state.pending_target = Some(symbol_key.clone());
    }

    match record.status {
        OrderStatus::Complete => {
            open_position_from_fill(
                flow,
                ctx,
                node,
                symbol_key,
                record.average_price,
                record.completed_at.unwrap_or(ctx.now),
                config,
                &snapshot,
            );
            let state = flow.state_mut(&node.id);
            state.pending_order_id = None;
            state.pending_target = None;
            Ok(LogicResult::completed())
        }
        status if status.is_terminal_failure() => {
            warn!(
                node = %node.id,
                order_id = %record.order_id,
                reason = record.rejection_reason.as_deref().unwrap_or("unknown"),
                "entry order rejected at placement; node deactivates without retry"
            );
            let state = flow.state_mut(&node.id);
            state.pending_order_id = None;
            state.pending_target = None;
            Ok(LogicResult::completed_without_children())
        }
        _ => Ok(LogicResult::not_yet()),
    }
}

#[allow(clippy::too_many_arguments)]
fn open_position_from_fill(
    flow: &mut FlowState,
    ctx: &mut CycleCtx<'_>,
    node: &Node,
    symbol: String,
    fill_price: f64,
    fill_time: NaiveDateTime,
    config: &EntryConfig,
    snapshot: &NodeState,
) {
    let vpi = ctx.positions.open_position(EntryData {
        node_id: node.id.clone(),
        symbol,
        quantity: config.quantity,
        side: config.side,
        price: fill_price,
        time: fill_time,
        re_entry_num: snapshot.re_entry_num,
        spot: ctx.data.ltp(&flow.instrument),
    });
    debug!(node = %node.id, %vpi, "entry fill recorded");
    flow.last_entry_tick = Some(ctx.now);
}

fn exit_logic(
    flow: &mut FlowState,
    ctx: &mut CycleCtx<'_>,
    node: &Node,
    config: &ExitConfig,
) -> Result<LogicResult> {
    let snapshot = flow.state(&node.id).clone();

    if let Some(order_id) = &snapshot.pending_order_id {
        let record = ctx.orders.get_order_status(order_id, true)?;
        return match record.status {
            OrderStatus::Complete => {
                if let Some(vpi) = &snapshot.pending_target {
                    close_with_record(
                        flow,
                        ctx,
                        node,
                        vpi,
                        record.average_price,
                        record.completed_at.unwrap_or(ctx.now),
                        "exit_condition_met",
                        snapshot.re_entry_num,
                    );
                }
                let state = flow.state_mut(&node.id);
                state.pending_order_id = None;
                state.pending_target = None;
                Ok(LogicResult::completed())
            }
            status if status.is_terminal_failure() => {
                warn!(
                    node = %node.id,
                    %order_id,
                    reason = record.rejection_reason.as_deref().unwrap_or("unknown"),
                    "exit order rejected; node deactivates without retry \
                     (open positions may need manual closure in live mode)"
                );
                let state = flow.state_mut(&node.id);
                state.pending_order_id = None;
                state.pending_target = None;
                Ok(LogicResult::completed_without_children())
            }
            _ => Ok(LogicResult::not_yet()),
        };
    }

    // Never close a position on the tick that opened it
    if flow.last_entry_tick == Some(ctx.now) {
        debug!(node = %node.id, now = %ctx.now, "deferring exit to avoid same-tick entry/exit");
        return Ok(LogicResult::not_yet());
    }

    let targets: Vec<String> = match &config.target_position_vpi {
        Some(vpi) => match ctx.positions.get(vpi) {
            Some(position) if position.is_open() => vec![vpi.clone()],
            _ => {
                info!(node = %node.id, %vpi, "target position missing or already closed");
                return Ok(LogicResult::completed());
            }
        },
        None => ctx.positions.open_position_ids(),
    };
    if targets.is_empty() {
        return Ok(LogicResult::completed());
    }

    for vpi in targets {
        let Some(position) = ctx.positions.get(&vpi) else {
            continue;
        };
        let symbol = position.symbol.clone();
        let side = position.side.opposite();
        let quantity = position.quantity;
        let price = ctx.data.ltp(&symbol).unwrap_or(position.current_price);

        let request = OrderRequest {
            symbol: symbol.clone(),
            exchange: config.exchange.clone(),
            side,
            quantity,
            order_type: config.order_type,
            product_type: config.product_type.clone(),
            price: Some(price),
        };
        let record = ctx.orders.place_order(&request, ctx.now)?;
        info!(
            node = %node.id,
            %vpi,
            symbol = %symbol,
            side = %side,
            order_id = %record.order_id,
            "exit order placed"
        );

        match record.status {
            OrderStatus::Complete => {
                close_with_record(
                    flow,
                    ctx,
                    node,
                    &vpi,
                    record.average_price,
                    record.completed_at.unwrap_or(ctx.now),
                    "exit_condition_met",
                    snapshot.re_entry_num,
                );
            }
            status if status.is_terminal_failure() => {
                warn!(
                    node = %node.id,
                    %vpi,
                    reason = record.rejection_reason.as_deref().unwrap_or("unknown"),
                    "exit order rejected at placement; node deactivates without retry"
                );
                return Ok(LogicResult::completed_without_children());
            }
            _ => {
                let state = flow.state_mut(&node.id);
                state.status = NodeStatus::Pending;
                state.pending_order_id = Some(record.order_id.clone());
                state.pending_target = Some(vpi);
                return Ok(LogicResult::not_yet());
            }
        }
    }

    Ok(LogicResult::completed())
}

#[allow(clippy::too_many_arguments)]
fn close_with_record(
    flow: &mut FlowState,
    ctx: &mut CycleCtx<'_>,
    node: &Node,
    vpi: &str,
    price: f64,
    time: NaiveDateTime,
    reason: &str,
    re_entry_num: u32,
) {
    let trigger_node_id = flow
        .last_exit_trigger
        .as_ref()
        .map(|t| t.node_id.clone());
    let spot = ctx
        .data
        .ltp(&flow.instrument)
        .or(flow.last_exit_trigger.as_ref().and_then(|t| t.price));
    let closed = ctx.positions.close_position(
        vpi,
        ExitRecord {
            node_id: node.id.clone(),
            price,
            time,
            reason: reason.into(),
            trigger_node_id,
            re_entry_num,
            spot,
        },
    );
    if !closed {
        warn!(node = %node.id, %vpi, "close requested for unknown or closed position");
    }
}

fn square_off_logic(
    flow: &mut FlowState,
    ctx: &mut CycleCtx<'_>,
    node: &Node,
    end_conditions: &EndConditions,
) -> Result<LogicResult> {
    // Runs at most once per run
    if flow.square_off_executed {
        return Ok(LogicResult::completed_without_children());
    }

    // Priority 1: immediate exit. Being activated by a parent is the trigger
    let mut reason: Option<String> = None;
    if end_conditions.immediate_exit.enabled {
        reason = Some("immediate exit triggered by parent condition".into());
    }

    // Priority 2: performance-based exit on realized + unrealized day P&L
    if reason.is_none() && end_conditions.performance_based_exit.enabled {
        let pnl = ctx.positions.total_pnl();
        if let Some(target) = end_conditions.performance_based_exit.profit_target
            && pnl >= target
        {
            reason = Some(format!("daily profit target reached (pnl {pnl:.2})"));
        } else if let Some(limit) = end_conditions.performance_based_exit.loss_limit
            && pnl <= -limit
        {
            reason = Some(format!("daily loss limit reached (pnl {pnl:.2})"));
        }
    }

    // Priority 3: time-based exit at a wall-clock time or N minutes before close
    if reason.is_none() && end_conditions.time_based_exit.enabled {
        let trigger = if let Some(raw) = &end_conditions.time_based_exit.time {
            NaiveTime::parse_from_str(raw, "%H:%M:%S")
                .map(|t| ctx.now.date().and_time(t))
                .map_err(|e| {
                    EngineError::document(format!("square-off time '{raw}' is invalid: {e}"))
                })
                .map(Some)?
        } else {
            end_conditions
                .time_based_exit
                .minutes_before_close
                .map(|m| ctx.market_close - Duration::minutes(m))
        };
        if let Some(at) = trigger
            && ctx.now >= at
        {
            reason = Some(format!("time-based exit at {}", at.time()));
        }
    }

    let Some(reason) = reason else {
        return Ok(LogicResult::not_yet());
    };

    info!(node = %node.id, %reason, now = %ctx.now, "square-off triggered");

    // Cancel anything still working at the broker
    let mut cancelled = 0;
    for order in ctx.orders.get_pending_orders() {
        match ctx.orders.cancel_order(&order.order_id) {
            Ok(outcome) if outcome.success => cancelled += 1,
            Ok(outcome) => warn!(
                order_id = %order.order_id,
                reason = outcome.reason.as_deref().unwrap_or("unknown"),
                "failed to cancel pending order"
            ),
            Err(e) => warn!(order_id = %order.order_id, error = %e, "cancel request failed"),
        }
    }

    // Flatten every open position at its last known price
    let spot = ctx.data.ltp(&flow.instrument);
    let mut closed = 0;
    for vpi in ctx.positions.open_position_ids() {
        let Some(position) = ctx.positions.get(&vpi) else {
            continue;
        };
        let price = ctx
            .data
            .ltp(&position.symbol)
            .unwrap_or(position.current_price);
        let re_entry_num = position.re_entry_num;
        ctx.positions.close_position(
            &vpi,
            ExitRecord {
                node_id: node.id.clone(),
                price,
                time: ctx.now,
                reason: "square_off".into(),
                trigger_node_id: None,
                re_entry_num,
                spot,
            },
        );
        closed += 1;
    }

    for state in flow.states.values_mut() {
        state.status = NodeStatus::Inactive;
        state.pending_order_id = None;
        state.pending_target = None;
    }
    flow.square_off_executed = true;
    flow.strategy_ended = true;
    info!(
        node = %node.id,
        orders_cancelled = cancelled,
        positions_closed = closed,
        "square-off complete; strategy ended"
    );

    Ok(LogicResult::completed_without_children())
}
