//! Scripted [`ExecutionAdapter`] for testing.
//!
//! Each call pops the next queued result for its operation and falls back to
//! a success default when the queue is empty. Every call is logged so tests
//! can assert on what the engine asked the venue to do.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::{BrokerOrderId, Direction, Instrument, Intent, IntentId, OrderKind};
use crate::error::AdapterError;
use crate::port::{CancelResult, ExecutionAdapter, FlattenResult, OcoGroup, OrderResult};

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    SubmitEntry {
        intent_id: IntentId,
        direction: Direction,
        price: Decimal,
    },
    SubmitProtective {
        intent_id: IntentId,
        kind: OrderKind,
        price: Decimal,
        quantity: u32,
    },
    ModifyStop {
        intent_id: IntentId,
        price: Decimal,
    },
    Cancel {
        intent_id: IntentId,
        kind: OrderKind,
    },
    Flatten {
        intent_id: IntentId,
    },
}

type Scripted<T> = Mutex<VecDeque<Result<T, AdapterError>>>;

pub struct ScriptedAdapter {
    calls: Mutex<Vec<AdapterCall>>,
    entry: Scripted<OrderResult>,
    protective: Scripted<OrderResult>,
    /// Used for protectives once the queue is empty.
    protective_default: Mutex<Option<OrderResult>>,
    modify: Scripted<OrderResult>,
    cancel: Scripted<CancelResult>,
    flatten: Scripted<FlattenResult>,
    flatten_default: Mutex<Option<FlattenResult>>,
    delay: Mutex<Option<Duration>>,
    next_id: AtomicU64,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            entry: Mutex::new(VecDeque::new()),
            protective: Mutex::new(VecDeque::new()),
            protective_default: Mutex::new(None),
            modify: Mutex::new(VecDeque::new()),
            cancel: Mutex::new(VecDeque::new()),
            flatten: Mutex::new(VecDeque::new()),
            flatten_default: Mutex::new(None),
            delay: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn push_entry_result(&self, result: Result<OrderResult, AdapterError>) {
        self.entry.lock().push_back(result);
    }

    pub fn push_protective_result(&self, result: Result<OrderResult, AdapterError>) {
        self.protective.lock().push_back(result);
    }

    /// Answer every unscripted protective submission with `result`.
    pub fn set_protective_default(&self, result: OrderResult) {
        *self.protective_default.lock() = Some(result);
    }

    pub fn push_modify_result(&self, result: Result<OrderResult, AdapterError>) {
        self.modify.lock().push_back(result);
    }

    pub fn push_cancel_result(&self, result: Result<CancelResult, AdapterError>) {
        self.cancel.lock().push_back(result);
    }

    pub fn push_flatten_result(&self, result: Result<FlattenResult, AdapterError>) {
        self.flatten.lock().push_back(result);
    }

    /// Answer every unscripted flatten with `result`.
    pub fn set_flatten_default(&self, result: FlattenResult) {
        *self.flatten_default.lock() = Some(result);
    }

    /// Sleep this long inside every call before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    pub fn entry_submissions(&self) -> Vec<AdapterCall> {
        self.filtered(|c| matches!(c, AdapterCall::SubmitEntry { .. }))
    }

    pub fn protective_submissions(&self) -> Vec<AdapterCall> {
        self.filtered(|c| matches!(c, AdapterCall::SubmitProtective { .. }))
    }

    pub fn stop_modifications(&self) -> Vec<AdapterCall> {
        self.filtered(|c| matches!(c, AdapterCall::ModifyStop { .. }))
    }

    pub fn cancels(&self) -> Vec<AdapterCall> {
        self.filtered(|c| matches!(c, AdapterCall::Cancel { .. }))
    }

    pub fn flattens(&self) -> Vec<AdapterCall> {
        self.filtered(|c| matches!(c, AdapterCall::Flatten { .. }))
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn filtered(&self, keep: impl Fn(&AdapterCall) -> bool) -> Vec<AdapterCall> {
        self.calls.lock().iter().filter(|c| keep(c)).cloned().collect()
    }

    fn accepted(&self) -> OrderResult {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        OrderResult::Accepted {
            broker_order_id: BrokerOrderId::new(format!("scripted-{n}")),
        }
    }

    async fn record(&self, call: AdapterCall) {
        self.calls.lock().push(call);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionAdapter for ScriptedAdapter {
    async fn submit_entry(&self, intent: &Intent) -> Result<OrderResult, AdapterError> {
        self.record(AdapterCall::SubmitEntry {
            intent_id: intent.id.clone(),
            direction: intent.direction,
            price: intent.entry_price,
        })
        .await;
        let scripted = self.entry.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.accepted()))
    }

    async fn submit_protective(
        &self,
        intent: &Intent,
        kind: OrderKind,
        price: Decimal,
        quantity: u32,
        _oco: &OcoGroup,
    ) -> Result<OrderResult, AdapterError> {
        self.record(AdapterCall::SubmitProtective {
            intent_id: intent.id.clone(),
            kind,
            price,
            quantity,
        })
        .await;
        let scripted = self.protective.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        let fallback = self.protective_default.lock().clone();
        Ok(fallback.unwrap_or_else(|| self.accepted()))
    }

    async fn modify_stop(
        &self,
        intent_id: &IntentId,
        price: Decimal,
    ) -> Result<OrderResult, AdapterError> {
        self.record(AdapterCall::ModifyStop {
            intent_id: intent_id.clone(),
            price,
        })
        .await;
        let scripted = self.modify.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.accepted()))
    }

    async fn cancel(
        &self,
        intent_id: &IntentId,
        kind: OrderKind,
    ) -> Result<CancelResult, AdapterError> {
        self.record(AdapterCall::Cancel {
            intent_id: intent_id.clone(),
            kind,
        })
        .await;
        let scripted = self.cancel.lock().pop_front();
        scripted.unwrap_or(Ok(CancelResult::Cancelled))
    }

    async fn flatten(
        &self,
        _instrument: &Instrument,
        intent_id: &IntentId,
    ) -> Result<FlattenResult, AdapterError> {
        self.record(AdapterCall::Flatten {
            intent_id: intent_id.clone(),
        })
        .await;
        let scripted = self.flatten.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        let fallback = self.flatten_default.lock().clone();
        Ok(fallback.unwrap_or(FlattenResult::AlreadyFlat))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
