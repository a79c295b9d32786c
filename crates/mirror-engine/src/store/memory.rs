use async_trait::async_trait;
use mirror_core::Order;
use parking_lot::Mutex;

use super::{EventLog, OrderEvent, OrderFilter, OrderStore, StoreResult};

/// Process-local order store. Contents are lost on restart.
#[derive(Debug)]
pub struct MemoryOrderStore {
    log: Mutex<EventLog>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self { log: Mutex::new(EventLog::new()) }
    }

    /// Number of distinct orders.
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// Total snapshots recorded, across all orders.
    pub fn event_count(&self) -> usize {
        self.log.lock().event_count()
    }
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: Order) -> StoreResult<()> {
        self.insert_many(vec![order]).await
    }

    async fn insert_many(&self, orders: Vec<Order>) -> StoreResult<()> {
        let mut log = self.log.lock();
        log.check_new(&orders)?;
        for order in orders {
            let event = log.stage(order, 0);
            log.append(event);
        }
        Ok(())
    }

    async fn update(&self, order: Order) -> StoreResult<()> {
        let mut log = self.log.lock();
        log.check_exists(order.exchange_order_id)?;
        let event = log.stage(order, 0);
        log.append(event);
        Ok(())
    }

    async fn get(&self, exchange_order_id: u64) -> StoreResult<Option<Order>> {
        Ok(self.log.lock().get(exchange_order_id).cloned())
    }

    async fn query(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        Ok(self.log.lock().query(filter))
    }

    async fn open_instruments(&self) -> StoreResult<Vec<String>> {
        Ok(self.log.lock().open_instruments())
    }

    async fn history(&self, exchange_order_id: u64) -> StoreResult<Vec<OrderEvent>> {
        Ok(self.log.lock().history(exchange_order_id))
    }
}

#[cfg(test)]
mod tests {
    use mirror_core::time_util::from_ms;
    use mirror_core::{OrderKind, OrderStatus, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::store::StoreError;

    fn row(id: u64, instrument: &str, status: OrderStatus, created_ms: i64) -> Order {
        Order {
            exchange_order_id: id,
            local_id: Uuid::new_v4(),
            instrument: instrument.to_owned(),
            side: Side::Buy,
            kind: OrderKind::Limit,
            quantity: dec!(1),
            price: dec!(100),
            stop_price: None,
            executed_quantity: dec!(0),
            cumulative_quote_amount: dec!(0),
            status,
            fee: dec!(0),
            created_at: from_ms(created_ms),
            updated_at: from_ms(created_ms),
            oco_list_id: None,
            oco_leg: None,
        }
    }

    #[tokio::test]
    async fn updates_append_and_latest_wins() {
        let store = MemoryOrderStore::new();
        store.insert(row(1, "BTCUSDT", OrderStatus::New, 1_000)).await.unwrap();

        let mut filled = row(1, "BTCUSDT", OrderStatus::Filled, 1_000);
        filled.executed_quantity = dec!(1);
        store.update(filled.clone()).await.unwrap();

        assert_eq!(store.get(1).await.unwrap().unwrap().status, OrderStatus::Filled);
        assert_eq!(store.len(), 1);
        assert_eq!(store.event_count(), 2);

        let history = store.history(1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].seq < history[1].seq);
        assert_eq!(history[0].order.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn insert_many_is_all_or_nothing() {
        let store = MemoryOrderStore::new();
        store.insert(row(2, "BTCUSDT", OrderStatus::New, 0)).await.unwrap();

        let batch = vec![row(3, "BTCUSDT", OrderStatus::New, 0), row(2, "BTCUSDT", OrderStatus::New, 0)];
        assert!(matches!(store.insert_many(batch).await, Err(StoreError::Duplicate(2))));
        assert!(store.get(3).await.unwrap().is_none());

        let repeated = vec![row(4, "BTCUSDT", OrderStatus::New, 0), row(4, "BTCUSDT", OrderStatus::New, 0)];
        assert!(store.insert_many(repeated).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_requires_existing_row() {
        let store = MemoryOrderStore::new();
        let err = store.update(row(9, "BTCUSDT", OrderStatus::Filled, 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(9)));
    }

    #[tokio::test]
    async fn filters_and_open_instruments() {
        let store = MemoryOrderStore::new();
        store
            .insert_many(vec![
                row(1, "ETHUSDT", OrderStatus::New, 3_000),
                row(2, "BTCUSDT", OrderStatus::Filled, 1_000),
                row(3, "BTCUSDT", OrderStatus::PartiallyFilled, 2_000),
                row(4, "SOLUSDT", OrderStatus::Canceled, 500),
            ])
            .await
            .unwrap();

        assert_eq!(store.open_instruments().await.unwrap(), vec!["BTCUSDT", "ETHUSDT"]);

        let open = store.query(&OrderFilter::default().open()).await.unwrap();
        assert_eq!(open.iter().map(|o| o.exchange_order_id).collect::<Vec<_>>(), vec![3, 1]);

        let btc = store.query(&OrderFilter::default().instrument("BTCUSDT")).await.unwrap();
        assert_eq!(btc.len(), 2);

        let window = OrderFilter::default().created_between(Some(from_ms(1_000)), Some(from_ms(3_000)));
        let ids: Vec<u64> = store.query(&window).await.unwrap().iter().map(|o| o.exchange_order_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
