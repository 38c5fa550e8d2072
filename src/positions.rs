//! Position store.
//!
//! An append-only log of positions keyed by VPI (virtual position id).
//! Opening stamps the lineage counter and the spot at entry; closing
//! appends an exit record and flips status. Prices are refreshed from
//! the LTP table every tick so P&L reads are always current.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::OrderSide;

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    /// Position is open
    Open,
    /// Position has been closed
    Closed,
}

/// One order execution against a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLeg {
    /// Whether this leg opened or closed the position
    pub kind: LegKind,
    /// Side the order traded on
    pub side: OrderSide,
    /// Quantity traded
    pub quantity: i64,
    /// Fill price
    pub price: f64,
    /// Fill time
    pub time: NaiveDateTime,
}

/// Open or close side of a transaction pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegKind {
    /// Opening execution
    Open,
    /// Closing execution
    Close,
}

/// What a position was opened with.
#[derive(Debug, Clone)]
pub struct EntryData {
    /// Node that opened the position
    pub node_id: String,
    /// Canonical symbol traded
    pub symbol: String,
    /// Quantity in units
    pub quantity: i64,
    /// Side at open
    pub side: OrderSide,
    /// Fill price
    pub price: f64,
    /// Fill time
    pub time: NaiveDateTime,
    /// Lineage counter at open
    pub re_entry_num: u32,
    /// Underlying spot at open, when known
    pub spot: Option<f64>,
}

/// How (part of) a position was closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRecord {
    /// Node that closed the position
    pub node_id: String,
    /// Fill price
    pub price: f64,
    /// Fill time
    pub time: NaiveDateTime,
    /// Exit class, e.g. `exit_condition_met`, `square_off`,
    /// `forced_square_off`
    pub reason: String,
    /// Signal node that triggered the exit, when one did
    pub trigger_node_id: Option<String>,
    /// Lineage counter at close
    pub re_entry_num: u32,
    /// Underlying spot at close, when known
    pub spot: Option<f64>,
}

/// A tracked position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Virtual position id, unique within the store
    pub position_id: String,
    /// Node that opened the position
    pub node_id: String,
    /// Canonical symbol
    pub symbol: String,
    /// Quantity in units
    pub quantity: i64,
    /// Side at open
    pub side: OrderSide,
    /// Fill price at open
    pub entry_price: f64,
    /// Fill time at open
    pub entry_time: NaiveDateTime,
    /// Lineage counter stamped at open
    pub re_entry_num: u32,
    /// Underlying spot at open
    pub spot_at_entry: Option<f64>,
    /// Last known price of the symbol
    pub current_price: f64,
    /// Open or closed
    pub status: PositionStatus,
    /// Every execution against this position
    pub transactions: Vec<TransactionLeg>,
    /// Exit records, most recent last
    pub exit_history: Vec<ExitRecord>,
}

impl Position {
    /// Signed P&L at `price` for this position's side and quantity.
    fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            OrderSide::Buy => (price - self.entry_price) * self.quantity as f64,
            OrderSide::Sell => (self.entry_price - price) * self.quantity as f64,
        }
    }

    /// Unrealized P&L at the last known price (zero once closed).
    pub fn unrealized_pnl(&self) -> f64 {
        match self.status {
            PositionStatus::Open => self.pnl_at(self.current_price),
            PositionStatus::Closed => 0.0,
        }
    }

    /// Realized P&L from the latest exit (zero while open).
    pub fn realized_pnl(&self) -> f64 {
        self.exit_history
            .last()
            .map(|exit| self.pnl_at(exit.price))
            .unwrap_or(0.0)
    }

    /// Whether the position is still open.
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Append-only position log keyed by VPI.
#[derive(Debug, Default)]
pub struct PositionStore {
    positions: Vec<Position>,
    index: HashMap<String, usize>,
    next_vpi: u64,
}

impl PositionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a position; returns its VPI.
    pub fn open_position(&mut self, entry: EntryData) -> String {
        self.next_vpi += 1;
        let vpi = format!("VPI-{:04}", self.next_vpi);
        let position = Position {
            position_id: vpi.clone(),
            node_id: entry.node_id,
            symbol: entry.symbol,
            quantity: entry.quantity,
            side: entry.side,
            entry_price: entry.price,
            entry_time: entry.time,
            re_entry_num: entry.re_entry_num,
            spot_at_entry: entry.spot,
            current_price: entry.price,
            status: PositionStatus::Open,
            transactions: vec![TransactionLeg {
                kind: LegKind::Open,
                side: entry.side,
                quantity: entry.quantity,
                price: entry.price,
                time: entry.time,
            }],
            exit_history: Vec::new(),
        };
        info!(
            vpi = %vpi,
            symbol = %position.symbol,
            side = %position.side,
            price = position.entry_price,
            re_entry_num = position.re_entry_num,
            "position opened"
        );
        self.index.insert(vpi.clone(), self.positions.len());
        self.positions.push(position);
        vpi
    }

    /// Close a position with an exit record. Returns `false` when the
    /// VPI is unknown or already closed.
    pub fn close_position(&mut self, position_id: &str, exit: ExitRecord) -> bool {
        let Some(position) = self
            .index
            .get(position_id)
            .and_then(|&i| self.positions.get_mut(i))
        else {
            return false;
        };
        if position.status == PositionStatus::Closed {
            return false;
        }
        position.transactions.push(TransactionLeg {
            kind: LegKind::Close,
            side: position.side.opposite(),
            quantity: position.quantity,
            price: exit.price,
            time: exit.time,
        });
        info!(
            vpi = %position.position_id,
            symbol = %position.symbol,
            price = exit.price,
            reason = %exit.reason,
            "position closed"
        );
        position.current_price = exit.price;
        position.status = PositionStatus::Closed;
        position.exit_history.push(exit);
        true
    }

    /// Look up a position by VPI.
    pub fn get(&self, position_id: &str) -> Option<&Position> {
        self.index
            .get(position_id)
            .and_then(|&i| self.positions.get(i))
    }

    /// Every position, in open order.
    pub fn get_all_positions(&self) -> &[Position] {
        &self.positions
    }

    /// Open positions, in open order.
    pub fn get_open_positions(&self) -> Vec<&Position> {
        self.positions.iter().filter(|p| p.is_open()).collect()
    }

    /// VPIs of open positions, in open order.
    pub fn open_position_ids(&self) -> Vec<String> {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.position_id.clone())
            .collect()
    }

    /// Refresh `current_price` on open positions from the LTP table.
    pub fn update_prices(&mut self, ltp: &HashMap<String, f64>) {
        for position in self.positions.iter_mut().filter(|p| p.is_open()) {
            if let Some(price) = ltp.get(&position.symbol) {
                position.current_price = *price;
            }
        }
    }

    /// Realized plus unrealized P&L across all positions.
    pub fn total_pnl(&self) -> f64 {
        self.positions
            .iter()
            .map(|p| p.realized_pnl() + p.unrealized_pnl())
            .sum()
    }
}
