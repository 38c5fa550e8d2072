//! Order placement boundary.
//!
//! Live deployments put a real broker adapter behind [`OrderPlacer`];
//! backtests use [`BacktestOrderPlacer`], which fills every order
//! COMPLETE immediately at the request price (nodes set the price to the
//! instrument's current LTP before placing market orders).

use std::collections::HashMap;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::models::{OrderRecord, OrderRequest, OrderStatus};

/// Errors raised by the order placer itself (not order rejections, which
/// travel through [`OrderStatus`]).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrderError {
    /// No order exists under this id
    #[error("Unknown order id '{order_id}'")]
    UnknownOrder {
        /// The id that failed to resolve
        order_id: String,
    },

    /// The broker connection failed
    #[error("Broker error: {0}")]
    Broker(String),
}

/// Outcome of a cancel request.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    /// Whether the order was cancelled
    pub success: bool,
    /// Broker-provided reason when it was not
    pub reason: Option<String>,
}

/// Places orders and reports their lifecycle.
pub trait OrderPlacer {
    /// Place an order; returns the created record (at least PENDING).
    fn place_order(
        &mut self,
        request: &OrderRequest,
        now: NaiveDateTime,
    ) -> Result<OrderRecord, OrderError>;

    /// Current status of an order. `refresh_from_broker` asks live
    /// adapters to poll instead of waiting for a postback.
    fn get_order_status(
        &mut self,
        order_id: &str,
        refresh_from_broker: bool,
    ) -> Result<OrderRecord, OrderError>;

    /// Cancel a working order.
    fn cancel_order(&mut self, order_id: &str) -> Result<CancelOutcome, OrderError>;

    /// Every order not yet in a terminal state.
    fn get_pending_orders(&self) -> Vec<OrderRecord>;
}

/// Immediate-fill placer for backtests.
#[derive(Debug, Default)]
pub struct BacktestOrderPlacer {
    orders: HashMap<String, OrderRecord>,
    sequence: u64,
}

impl BacktestOrderPlacer {
    /// Create an empty placer.
    pub fn new() -> Self {
        Self::default()
    }

    /// All orders placed so far, in placement order.
    pub fn placed(&self) -> Vec<OrderRecord> {
        let mut all: Vec<OrderRecord> = self.orders.values().cloned().collect();
        all.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        all
    }
}

impl OrderPlacer for BacktestOrderPlacer {
    fn place_order(
        &mut self,
        request: &OrderRequest,
        now: NaiveDateTime,
    ) -> Result<OrderRecord, OrderError> {
        self.sequence += 1;
        let order_id = format!("ORD-{:06}", self.sequence);
        let record = OrderRecord {
            order_id: order_id.clone(),
            broker_order_id: format!("BT-{:06}", self.sequence),
            status: OrderStatus::Complete,
            filled_quantity: request.quantity,
            quantity: request.quantity,
            average_price: request.price.unwrap_or(0.0),
            completed_at: Some(now),
            rejection_reason: None,
        };
        self.orders.insert(order_id, record.clone());
        Ok(record)
    }

    fn get_order_status(
        &mut self,
        order_id: &str,
        _refresh_from_broker: bool,
    ) -> Result<OrderRecord, OrderError> {
        self.orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| OrderError::UnknownOrder {
                order_id: order_id.to_string(),
            })
    }

    fn cancel_order(&mut self, order_id: &str) -> Result<CancelOutcome, OrderError> {
        match self.orders.get_mut(order_id) {
            Some(record) if record.status == OrderStatus::Complete => Ok(CancelOutcome {
                success: false,
                reason: Some("order already complete".to_string()),
            }),
            Some(record) => {
                record.status = OrderStatus::Cancelled;
                Ok(CancelOutcome {
                    success: true,
                    reason: None,
                })
            }
            None => Err(OrderError::UnknownOrder {
                order_id: order_id.to_string(),
            }),
        }
    }

    fn get_pending_orders(&self) -> Vec<OrderRecord> {
        self.orders
            .values()
            .filter(|r| matches!(r.status, OrderStatus::Pending | OrderStatus::PartiallyFilled))
            .cloned()
            .collect()
    }
}
