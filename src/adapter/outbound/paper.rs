//! Paper venue: keeps a simulated order book and fills it against bars.
//!
//! Fill rules per bar, evaluated only for orders resting before the bar is
//! offered:
//!
//! - stop-market entry and protective stop trigger when the bar trades
//!   through the price and fill at the worse of price and bar open;
//! - limit entry and target fill at their price when the bar touches it;
//! - when a stop and target both touch in one bar, the stop fills.
//!
//! A protective fill that closes the position cancels its sibling, mirroring
//! a venue-side OCO group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::domain::{
    Bar, BrokerOrderId, Direction, EntryOrderType, Instrument, Intent, IntentId, OrderKind,
};
use crate::error::AdapterError;
use crate::port::{
    CancelResult, ExecutionAdapter, ExecutionEvent, FillReport, FlattenResult, OcoGroup,
    OrderResult, OrderStatus, OrderUpdate,
};

#[derive(Debug, Clone)]
struct PaperOrder {
    broker_order_id: BrokerOrderId,
    instrument: Instrument,
    direction: Direction,
    kind: OrderKind,
    entry_type: EntryOrderType,
    price: Decimal,
    remaining: u32,
}

impl PaperOrder {
    /// Price at which this order fills on `bar`, if it does.
    fn fill_price(&self, bar: &Bar) -> Option<Decimal> {
        // Entries buy for longs; protectives sell for longs.
        let buys = match self.kind {
            OrderKind::Entry => self.direction == Direction::Long,
            OrderKind::Stop | OrderKind::Target => self.direction == Direction::Short,
        };
        let is_stop = match self.kind {
            OrderKind::Entry => self.entry_type == EntryOrderType::StopMarket,
            OrderKind::Stop => true,
            OrderKind::Target => false,
        };
        match (is_stop, buys) {
            (true, true) => (bar.high >= self.price).then(|| self.price.max(bar.open)),
            (true, false) => (bar.low <= self.price).then(|| self.price.min(bar.open)),
            (false, true) => (bar.low <= self.price).then_some(self.price),
            (false, false) => (bar.high >= self.price).then_some(self.price),
        }
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    orders: HashMap<(IntentId, OrderKind), PaperOrder>,
    positions: HashMap<IntentId, u32>,
    filled: HashMap<(IntentId, OrderKind), u32>,
}

/// Simulated venue for replay runs.
#[derive(Debug)]
pub struct PaperAdapter {
    book: Mutex<PaperBook>,
    next_id: AtomicU64,
    /// Largest quantity filled per order per bar; `None` fills completely.
    max_fill_per_bar: Option<u32>,
}

impl Default for PaperAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            book: Mutex::new(PaperBook::default()),
            next_id: AtomicU64::new(1),
            max_fill_per_bar: None,
        }
    }

    /// Fill at most `quantity` per order per bar, to exercise partial fills.
    #[must_use]
    pub fn with_max_fill_per_bar(mut self, quantity: u32) -> Self {
        self.max_fill_per_bar = Some(quantity.max(1));
        self
    }

    fn next_broker_id(&self) -> BrokerOrderId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        BrokerOrderId::new(format!("paper-{n}"))
    }

    /// Working orders currently resting.
    #[must_use]
    pub fn working_orders(&self) -> usize {
        self.book.lock().orders.len()
    }

    /// Open quantity held for an intent.
    #[must_use]
    pub fn position(&self, intent_id: &IntentId) -> u32 {
        self.book.lock().positions.get(intent_id).copied().unwrap_or(0)
    }

    /// Offer a closed bar to the book and return the resulting events.
    pub fn on_bar(&self, instrument: &Instrument, bar: &Bar) -> Vec<ExecutionEvent> {
        let mut book = self.book.lock();
        let mut keys: Vec<_> = book
            .orders
            .iter()
            .filter(|(_, o)| &o.instrument == instrument)
            .map(|(k, _)| k.clone())
            .collect();
        // Entries before exits; stops before targets.
        keys.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

        let mut events = Vec::new();
        for key in keys {
            let Some(order) = book.orders.get(&key).cloned() else {
                continue;
            };
            let Some(price) = order.fill_price(bar) else {
                continue;
            };
            let (intent_id, kind) = key.clone();
            let mut quantity = self.max_fill_per_bar.map_or(order.remaining, |max| order.remaining.min(max));
            if kind.is_protective() {
                let held = book.positions.get(&intent_id).copied().unwrap_or(0);
                quantity = quantity.min(held);
                if quantity == 0 {
                    continue;
                }
            }

            let remaining = order.remaining - quantity;
            if remaining == 0 {
                book.orders.remove(&key);
            } else if let Some(resting) = book.orders.get_mut(&key) {
                resting.remaining = remaining;
            }
            *book.filled.entry(key.clone()).or_default() += quantity;
            let position = book.positions.entry(intent_id.clone()).or_default();
            if kind == OrderKind::Entry {
                *position += quantity;
            } else {
                *position = position.saturating_sub(quantity);
            }
            let flat = *position == 0;

            debug!(intent_id = %intent_id, kind = %kind, price = %price, quantity, "Paper fill");
            events.push(ExecutionEvent::Fill(FillReport {
                intent_id: intent_id.clone(),
                kind,
                broker_order_id: Some(order.broker_order_id.clone()),
                price,
                delta: quantity,
                at: bar.timestamp,
            }));

            if kind.is_protective() && flat {
                let sibling = match kind {
                    OrderKind::Stop => OrderKind::Target,
                    _ => OrderKind::Stop,
                };
                if book.orders.remove(&(intent_id.clone(), sibling)).is_some() {
                    events.push(ExecutionEvent::Update(OrderUpdate {
                        intent_id,
                        kind: sibling,
                        status: OrderStatus::Cancelled,
                        at: bar.timestamp,
                    }));
                }
            }
        }
        events
    }

    fn rest(&self, intent: &Intent, kind: OrderKind, price: Decimal, quantity: u32) -> BrokerOrderId {
        let broker_order_id = self.next_broker_id();
        let order = PaperOrder {
            broker_order_id: broker_order_id.clone(),
            instrument: intent.stream.instrument.clone(),
            direction: intent.direction,
            kind,
            entry_type: intent.entry_type,
            price,
            remaining: quantity,
        };
        self.book.lock().orders.insert((intent.id.clone(), kind), order);
        broker_order_id
    }
}

#[async_trait]
impl ExecutionAdapter for PaperAdapter {
    async fn submit_entry(&self, intent: &Intent) -> Result<OrderResult, AdapterError> {
        let broker_order_id = self.rest(intent, OrderKind::Entry, intent.entry_price, intent.quantity);
        info!(
            intent_id = %intent.id,
            direction = %intent.direction,
            price = %intent.entry_price,
            broker_order_id = %broker_order_id,
            "Paper entry resting"
        );
        Ok(OrderResult::Accepted { broker_order_id })
    }

    async fn submit_protective(
        &self,
        intent: &Intent,
        kind: OrderKind,
        price: Decimal,
        quantity: u32,
        oco: &OcoGroup,
    ) -> Result<OrderResult, AdapterError> {
        if !kind.is_protective() {
            return Ok(OrderResult::Rejected {
                reason: format!("{kind} is not a protective order"),
            });
        }
        let broker_order_id = self.rest(intent, kind, price, quantity);
        debug!(intent_id = %intent.id, kind = %kind, oco = %oco, "Paper protective resting");
        Ok(OrderResult::Accepted { broker_order_id })
    }

    async fn modify_stop(&self, intent_id: &IntentId, price: Decimal) -> Result<OrderResult, AdapterError> {
        let mut book = self.book.lock();
        let key = (intent_id.clone(), OrderKind::Stop);
        if let Some(stop) = book.orders.get_mut(&key) {
            stop.price = price;
            return Ok(OrderResult::Accepted {
                broker_order_id: stop.broker_order_id.clone(),
            });
        }
        if book.filled.get(&key).copied().unwrap_or(0) > 0 {
            return Ok(OrderResult::AlreadyFilled);
        }
        Ok(OrderResult::Rejected {
            reason: "no working stop".to_string(),
        })
    }

    async fn cancel(&self, intent_id: &IntentId, kind: OrderKind) -> Result<CancelResult, AdapterError> {
        let mut book = self.book.lock();
        let key = (intent_id.clone(), kind);
        if book.orders.remove(&key).is_some() {
            return Ok(CancelResult::Cancelled);
        }
        if book.filled.get(&key).copied().unwrap_or(0) > 0 {
            return Ok(CancelResult::AlreadyFilled);
        }
        Ok(CancelResult::NotFound)
    }

    async fn flatten(&self, _instrument: &Instrument, intent_id: &IntentId) -> Result<FlattenResult, AdapterError> {
        let mut book = self.book.lock();
        book.orders.retain(|(id, _), _| id != intent_id);
        match book.positions.remove(intent_id) {
            Some(quantity) if quantity > 0 => Ok(FlattenResult::Flattened { quantity }),
            _ => Ok(FlattenResult::AlreadyFlat),
        }
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BarSource, StreamKey, TriggerReason};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn intent(direction: Direction) -> Intent {
        let stream = StreamKey::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            "ES1",
            Instrument::new("ES"),
            "S1",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        );
        let (entry, stop, target) = match direction {
            Direction::Long => (dec!(100.25), dec!(99.25), dec!(104.25)),
            Direction::Short => (dec!(98.75), dec!(99.75), dec!(94.75)),
        };
        Intent {
            id: Intent::compute_id(&stream, direction, EntryOrderType::StopMarket, entry, stop, target),
            stream,
            direction,
            entry_type: EntryOrderType::StopMarket,
            entry_price: entry,
            stop_price: stop,
            target_price: target,
            breakout_level: entry,
            break_even_trigger_price: entry,
            break_even_stop_price: entry,
            quantity: 2,
            trigger_reason: TriggerReason::BreakoutStop,
        }
    }

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 14, 5, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(10),
            source: BarSource::Live,
        }
    }

    #[tokio::test]
    async fn stop_entry_fills_at_level_then_stop_closes_and_cancels_target() {
        let paper = PaperAdapter::new();
        let long = intent(Direction::Long);
        let es = Instrument::new("ES");
        paper.submit_entry(&long).await.unwrap();

        let events = paper.on_bar(&es, &bar(dec!(100), dec!(100.75), dec!(99.75), dec!(100.5)));
        assert_eq!(events.len(), 1);
        let ExecutionEvent::Fill(fill) = &events[0] else {
            panic!("expected fill");
        };
        assert_eq!(fill.price, dec!(100.25));
        assert_eq!(fill.delta, 2);
        assert_eq!(paper.position(&long.id), 2);

        let oco = OcoGroup::for_intent(&long.id);
        paper
            .submit_protective(&long, OrderKind::Stop, dec!(99.25), 2, &oco)
            .await
            .unwrap();
        paper
            .submit_protective(&long, OrderKind::Target, dec!(104.25), 2, &oco)
            .await
            .unwrap();

        let events = paper.on_bar(&es, &bar(dec!(99.5), dec!(99.5), dec!(99), dec!(99.1)));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ExecutionEvent::Fill(f) if f.kind == OrderKind::Stop && f.price == dec!(99.25)));
        assert!(matches!(&events[1], ExecutionEvent::Update(u) if u.kind == OrderKind::Target));
        assert_eq!(paper.working_orders(), 0);
    }

    #[tokio::test]
    async fn partial_fills_are_capped_per_bar() {
        let paper = PaperAdapter::new().with_max_fill_per_bar(1);
        let long = intent(Direction::Long);
        let es = Instrument::new("ES");
        paper.submit_entry(&long).await.unwrap();
        let b = bar(dec!(100.5), dec!(101), dec!(100.25), dec!(100.75));
        assert_eq!(paper.on_bar(&es, &b).len(), 1);
        assert_eq!(paper.position(&long.id), 1);
        assert_eq!(paper.on_bar(&es, &b).len(), 1);
        assert_eq!(paper.position(&long.id), 2);
        assert!(paper.on_bar(&es, &b).is_empty());
    }

    #[tokio::test]
    async fn cancel_and_flatten_report_explicit_outcomes() {
        let paper = PaperAdapter::new();
        let short = intent(Direction::Short);
        assert_eq!(
            paper.cancel(&short.id, OrderKind::Entry).await.unwrap(),
            CancelResult::NotFound
        );
        paper.submit_entry(&short).await.unwrap();
        assert_eq!(
            paper.cancel(&short.id, OrderKind::Entry).await.unwrap(),
            CancelResult::Cancelled
        );
        assert_eq!(
            paper.flatten(&Instrument::new("ES"), &short.id).await.unwrap(),
            FlattenResult::AlreadyFlat
        );
        assert!(matches!(
            paper.modify_stop(&short.id, dec!(99)).await.unwrap(),
            OrderResult::Rejected { .. }
        ));
    }
}
