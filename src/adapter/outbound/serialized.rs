//! Serializes calls into one venue binding.
//!
//! Streams decide concurrently, but a single connection must see one order
//! call at a time. The lock is held only for the duration of the inner call.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::trace;

use crate::domain::{Instrument, Intent, IntentId, OrderKind};
use crate::error::AdapterError;
use crate::port::{CancelResult, ExecutionAdapter, FlattenResult, OcoGroup, OrderResult};

/// Wraps an adapter so its calls never overlap.
pub struct SerializedAdapter {
    inner: Arc<dyn ExecutionAdapter>,
    gate: Mutex<()>,
}

impl SerializedAdapter {
    pub fn new(inner: Arc<dyn ExecutionAdapter>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for SerializedAdapter {
    async fn submit_entry(&self, intent: &Intent) -> Result<OrderResult, AdapterError> {
        let _guard = self.gate.lock().await;
        trace!(intent_id = %intent.id, "submit_entry");
        self.inner.submit_entry(intent).await
    }

    async fn submit_protective(
        &self,
        intent: &Intent,
        kind: OrderKind,
        price: Decimal,
        quantity: u32,
        oco: &OcoGroup,
    ) -> Result<OrderResult, AdapterError> {
        let _guard = self.gate.lock().await;
        trace!(intent_id = %intent.id, kind = %kind, "submit_protective");
        self.inner
            .submit_protective(intent, kind, price, quantity, oco)
            .await
    }

    async fn modify_stop(&self, intent_id: &IntentId, price: Decimal) -> Result<OrderResult, AdapterError> {
        let _guard = self.gate.lock().await;
        self.inner.modify_stop(intent_id, price).await
    }

    async fn cancel(&self, intent_id: &IntentId, kind: OrderKind) -> Result<CancelResult, AdapterError> {
        let _guard = self.gate.lock().await;
        self.inner.cancel(intent_id, kind).await
    }

    async fn flatten(&self, instrument: &Instrument, intent_id: &IntentId) -> Result<FlattenResult, AdapterError> {
        let _guard = self.gate.lock().await;
        self.inner.flatten(instrument, intent_id).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
