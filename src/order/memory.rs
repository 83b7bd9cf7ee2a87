//! In-process order store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::OrderError;
use super::state::OrderStatus;
use super::types::{Order, OrderItem, OrderTree, RefundRecord};
use super::OrderStore;
use crate::core_types::{OrderId, OrderItemId, PaymentId, UserId};

#[derive(Default)]
struct OrderState {
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<OrderItemId, OrderItem>,
    by_no: HashMap<String, OrderId>,
    refunds: HashMap<(OrderId, String), Decimal>,
    next_order_id: OrderId,
    next_item_id: OrderItemId,
}

impl OrderState {
    fn insert(&mut self, mut tree: OrderTree, parent_id: Option<OrderId>) -> OrderTree {
        self.next_order_id += 1;
        let id = self.next_order_id;
        tree.order.id = id;
        tree.order.parent_id = parent_id;
        for item in &mut tree.items {
            self.next_item_id += 1;
            item.id = self.next_item_id;
            item.order_id = id;
            self.items.insert(item.id, item.clone());
        }
        self.by_no.insert(tree.order.order_no.clone(), id);
        self.orders.insert(id, tree.order.clone());
        tree.children = std::mem::take(&mut tree.children)
            .into_iter()
            .map(|c| self.insert(c, Some(id)))
            .collect();
        tree
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    state: Mutex<OrderState>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OrderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert_tree(&self, tree: OrderTree) -> Result<OrderTree, OrderError> {
        let mut state = self.lock();
        if tree
            .rows()
            .iter()
            .any(|o| state.by_no.contains_key(&o.order_no))
        {
            return Err(OrderError::DatabaseError(format!(
                "duplicate order_no {}",
                tree.order.order_no
            )));
        }
        Ok(state.insert(tree, None))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn get_by_no(&self, order_no: &str) -> Result<Option<Order>, OrderError> {
        let state = self.lock();
        Ok(state
            .by_no
            .get(order_no)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn children(&self, parent_id: OrderId) -> Result<Vec<Order>, OrderError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| o.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, OrderError> {
        Ok(self
            .lock()
            .items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, OrderError> {
        let mut state = self.lock();
        match state.orders.get_mut(&id) {
            Some(o) if o.status == from => {
                o.status = to;
                o.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_paid(
        &self,
        id: OrderId,
        payment_id: PaymentId,
        wallet_paid: Decimal,
        online_paid: Decimal,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        let mut state = self.lock();
        match state.orders.get_mut(&id) {
            Some(o) if o.status == OrderStatus::PendingPayment => {
                o.status = OrderStatus::Paid;
                o.paid_payment_id = Some(payment_id);
                o.wallet_paid = wallet_paid;
                o.online_paid = online_paid;
                o.paid_at = Some(paid_at);
                o.updated_at = paid_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        id: OrderId,
        from: OrderStatus,
        delivery_text: Option<&str>,
    ) -> Result<bool, OrderError> {
        let mut state = self.lock();
        match state.orders.get_mut(&id) {
            Some(o) if o.status == from => {
                let now = Utc::now();
                o.status = OrderStatus::Completed;
                if let Some(text) = delivery_text {
                    o.delivery_text = Some(text.to_string());
                }
                o.completed_at = Some(now);
                o.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_reservation(
        &self,
        item_id: OrderItemId,
        expected: Option<&str>,
        token: &str,
    ) -> Result<bool, OrderError> {
        match self.lock().items.get_mut(&item_id) {
            Some(item) if item.reservation_token.as_deref() == expected => {
                item.reservation_token = Some(token.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_delivery(
        &self,
        item_id: OrderItemId,
        secrets: &[String],
    ) -> Result<(), OrderError> {
        if let Some(item) = self.lock().items.get_mut(&item_id) {
            item.delivered_secrets = secrets.to_vec();
        }
        Ok(())
    }

    async fn add_refund(
        &self,
        id: OrderId,
        request_id: &str,
        amount: Decimal,
    ) -> Result<RefundRecord, OrderError> {
        let mut state = self.lock();
        let key = (id, request_id.to_string());
        if let Some(recorded) = state.refunds.get(&key).copied() {
            let order = state
                .orders
                .get(&id)
                .cloned()
                .ok_or_else(|| OrderError::OrderNotFound(id.to_string()))?;
            return Ok(RefundRecord::Replayed { order, amount: recorded });
        }
        let updated = match state.orders.get_mut(&id) {
            Some(o) if o.refunded_amount + amount <= o.wallet_paid + o.online_paid => {
                o.refunded_amount += amount;
                o.updated_at = Utc::now();
                o.clone()
            }
            _ => return Ok(RefundRecord::Exceeds),
        };
        state.refunds.insert(key, amount);
        Ok(RefundRecord::Applied(updated))
    }

    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, OrderError> {
        let state = self.lock();
        let mut overdue: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                o.parent_id.is_none()
                    && o.status == OrderStatus::PendingPayment
                    && o.expires_at <= now
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|o| (o.expires_at, o.id));
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, OrderError> {
        let state = self.lock();
        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| o.parent_id.is_none() && o.user_id == Some(user_id))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
