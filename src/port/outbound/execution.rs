//! Execution port for order routing.
//!
//! The engine talks to a venue only through [`ExecutionAdapter`]. Expected
//! venue outcomes (rejections, orders that already filled) are explicit
//! result values; `Err` is reserved for transport problems such as timeouts.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{BrokerOrderId, Instrument, Intent, IntentId, OrderKind};
use crate::error::AdapterError;

/// Logical one-cancels-other group for a protective pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OcoGroup(String);

impl OcoGroup {
    /// Group shared by the stop and target of one intent.
    #[must_use]
    pub fn for_intent(intent_id: &IntentId) -> Self {
        Self(format!("oco-{intent_id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OcoGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a submit or modify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderResult {
    Accepted { broker_order_id: BrokerOrderId },
    Rejected { reason: String },
    /// The order being modified has already filled.
    AlreadyFilled,
    /// Temporary venue condition; the same call may succeed if retried.
    Transient { reason: String },
}

impl OrderResult {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Outcome of a cancel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled,
    /// No working order exists for that intent and kind.
    NotFound,
    AlreadyFilled,
}

/// Outcome of a flatten call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlattenResult {
    Flattened { quantity: u32 },
    AlreadyFlat,
    Failed { reason: String },
}

impl FlattenResult {
    /// The position is known to be flat afterwards.
    #[must_use]
    pub const fn is_flat(&self) -> bool {
        matches!(self, Self::Flattened { .. } | Self::AlreadyFlat)
    }
}

/// Incremental fill reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub intent_id: IntentId,
    pub kind: OrderKind,
    pub broker_order_id: Option<BrokerOrderId>,
    pub price: Decimal,
    /// Quantity filled by this report alone.
    pub delta: u32,
    pub at: DateTime<Utc>,
}

/// Non-fill status change of a working order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum OrderStatus {
    Working,
    Cancelled,
    Rejected { reason: String },
}

/// Order status update reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub intent_id: IntentId,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}

/// Asynchronous callbacks delivered from an adapter to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Fill(FillReport),
    Update(OrderUpdate),
}

impl ExecutionEvent {
    #[must_use]
    pub fn intent_id(&self) -> &IntentId {
        match self {
            Self::Fill(fill) => &fill.intent_id,
            Self::Update(update) => &update.intent_id,
        }
    }
}

/// Order routing for one venue binding.
///
/// Submitting a protective order for an (intent, kind) that already has a
/// working order replaces it with the new price and quantity.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Submit the entry order described by the intent.
    async fn submit_entry(&self, intent: &Intent) -> Result<OrderResult, AdapterError>;

    /// Submit (or resize) one leg of the protective pair.
    async fn submit_protective(
        &self,
        intent: &Intent,
        kind: OrderKind,
        price: Decimal,
        quantity: u32,
        oco: &OcoGroup,
    ) -> Result<OrderResult, AdapterError>;

    /// Move the working stop of an intent.
    async fn modify_stop(
        &self,
        intent_id: &IntentId,
        price: Decimal,
    ) -> Result<OrderResult, AdapterError>;

    /// Cancel the working order of one kind for an intent.
    async fn cancel(&self, intent_id: &IntentId, kind: OrderKind)
        -> Result<CancelResult, AdapterError>;

    /// Close any position held for the intent at market.
    async fn flatten(
        &self,
        instrument: &Instrument,
        intent_id: &IntentId,
    ) -> Result<FlattenResult, AdapterError>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}
