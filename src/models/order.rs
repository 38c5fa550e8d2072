/// Order types shared by the node graph and the order-placer boundary.
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy to open (or buy to cover a short)
    Buy,
    /// Sell to open (or sell to close a long)
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened on this side.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order pricing type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Execute at the prevailing price
    #[default]
    Market,
    /// Execute at the given price or better
    Limit,
}

/// Lifecycle state reported by the order placer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, not yet filled
    Pending,
    /// Fully filled
    Complete,
    /// Some quantity filled, remainder working
    PartiallyFilled,
    /// Rejected by the broker; never retried by the engine
    Rejected,
    /// Cancelled before completion
    Cancelled,
}

impl OrderStatus {
    /// Terminal-failure states (the owning node deactivates without retry).
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

/// A request handed to the order placer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    /// Canonical symbol to trade
    pub symbol: String,
    /// Exchange segment, e.g. `NFO`
    pub exchange: String,
    /// Buy or sell
    pub side: OrderSide,
    /// Quantity in units (a whole number of lots upstream)
    pub quantity: i64,
    /// Market or limit
    pub order_type: OrderType,
    /// Product type, e.g. `INTRADAY`
    pub product_type: String,
    /// Limit price; ignored for market orders
    pub price: Option<f64>,
}

/// The order placer's view of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    /// Engine-side order id
    pub order_id: String,
    /// Broker-side order id
    pub broker_order_id: String,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Quantity filled so far
    pub filled_quantity: i64,
    /// Total quantity
    pub quantity: i64,
    /// Average fill price over filled quantity
    pub average_price: f64,
    /// When the order reached a terminal state
    pub completed_at: Option<NaiveDateTime>,
    /// Broker-provided reason on rejection
    pub rejection_reason: Option<String>,
}
