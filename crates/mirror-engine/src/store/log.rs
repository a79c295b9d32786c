use std::collections::BTreeSet;

use ahash::{AHashMap, AHashSet};
use chrono::Utc;
use mirror_core::Order;

use super::{OrderEvent, OrderFilter, StoreError, StoreResult};

/// In-memory event log with a latest-snapshot index.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<OrderEvent>,
    /// order id → index of its latest event.
    latest: AHashMap<u64, usize>,
    next_seq: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self { next_seq: 1, ..Default::default() }
    }

    /// Check that none of `orders` is mirrored yet and that the batch has no
    /// repeated ids.
    pub fn check_new(&self, orders: &[Order]) -> StoreResult<()> {
        let mut seen = AHashSet::with_capacity(orders.len());
        for order in orders {
            let id = order.exchange_order_id;
            if self.latest.contains_key(&id) || !seen.insert(id) {
                return Err(StoreError::Duplicate(id));
            }
        }
        Ok(())
    }

    pub fn check_exists(&self, exchange_order_id: u64) -> StoreResult<()> {
        if self.latest.contains_key(&exchange_order_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(exchange_order_id))
        }
    }

    /// Build the event `append` would record, without recording it.
    pub fn stage(&self, order: Order, offset: u64) -> OrderEvent {
        OrderEvent { seq: self.next_seq + offset, recorded_at: Utc::now(), order }
    }

    /// Record an event. Sequence numbers must be increasing.
    pub fn append(&mut self, event: OrderEvent) {
        self.next_seq = self.next_seq.max(event.seq + 1);
        self.latest.insert(event.order.exchange_order_id, self.events.len());
        self.events.push(event);
    }

    pub fn get(&self, exchange_order_id: u64) -> Option<&Order> {
        self.latest.get(&exchange_order_id).map(|&idx| &self.events[idx].order)
    }

    pub fn query(&self, filter: &OrderFilter) -> Vec<Order> {
        let mut rows: Vec<Order> =
            self.latest.values().map(|&idx| &self.events[idx].order).filter(|o| filter.matches(o)).cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.exchange_order_id.cmp(&b.exchange_order_id)));
        rows
    }

    pub fn open_instruments(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .latest
            .values()
            .map(|&idx| &self.events[idx].order)
            .filter(|o| o.is_open())
            .map(|o| o.instrument.as_str())
            .collect();
        set.into_iter().map(str::to_owned).collect()
    }

    pub fn history(&self, exchange_order_id: u64) -> Vec<OrderEvent> {
        self.events.iter().filter(|e| e.order.exchange_order_id == exchange_order_id).cloned().collect()
    }

    /// Number of distinct orders.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
