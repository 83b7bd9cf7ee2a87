//! Order Service - lifecycle operations over [`OrderStore`]
//!
//! Creation reserves inventory before anything is persisted and releases it
//! on every failure path, so a caller never sees a half-reserved order.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::OrderError;
use super::form::validate_manual_form;
use super::guest::{hash_order_password, normalize_email, verify_order_password};
use super::number::OrderNoGenerator;
use super::state::OrderStatus;
use super::types::{CheckoutRequest, Order, OrderItem, OrderOwner, OrderTree, RefundRecord};
use super::OrderStore;
use crate::catalog::FulfillmentType;
use crate::core_types::{Currency, OrderId, OrderItemId, PaymentId, ProductId, SkuId, UserId};
use crate::inventory::{InventoryError, InventoryLedger, ReservationState, StockTarget};
use crate::pricing::{PriceItem, PriceRequest, PricedItem, PricedOrder, PricingEngine, PromotionContext};

/// Shop-level order settings
#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub currency: Currency,
    pub expire_minutes: i64,
    pub order_no_prefix: String,
    pub guest_orders_enabled: bool,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            currency: Currency::default(),
            expire_minutes: 15,
            order_no_prefix: "DS".to_string(),
            guest_orders_enabled: true,
        }
    }
}

/// Result of [`OrderService::settle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The order moved `pending_payment -> paid` in this call
    Settled,
    /// Already paid by the same payment (replay)
    AlreadyPaid,
}

/// Secrets delivered for one item at settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub order_no: String,
    pub item_id: OrderItemId,
    pub secrets: Vec<String>,
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    pricing: PricingEngine,
    inventory: InventoryLedger,
    numbers: Arc<OrderNoGenerator>,
    settings: OrderSettings,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        pricing: PricingEngine,
        inventory: InventoryLedger,
        numbers: Arc<OrderNoGenerator>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            store,
            pricing,
            inventory,
            numbers,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn settings(&self) -> &OrderSettings {
        &self.settings
    }

    fn price_request(&self, req: &CheckoutRequest) -> Result<PriceRequest, OrderError> {
        if req.items.is_empty() {
            return Err(OrderError::ItemsEmpty);
        }
        if req.items.iter().any(|i| i.quantity <= 0) {
            return Err(OrderError::InvalidQuantity);
        }
        Ok(PriceRequest {
            currency: req
                .currency
                .clone()
                .unwrap_or_else(|| self.settings.currency.clone()),
            user_id: req.owner.user_id(),
            items: req
                .items
                .iter()
                .map(|i| PriceItem {
                    product_id: i.product_id,
                    sku_id: i.sku_id,
                    quantity: i.quantity,
                })
                .collect(),
            coupon_code: req
                .coupon_code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    /// Price a checkout without side effects
    pub async fn preview(
        &self,
        req: &CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<PricedOrder, OrderError> {
        let price_req = self.price_request(req)?;
        let ctx = PromotionContext {
            now,
            promotion_id: req.promotion_id,
        };
        let priced = self.pricing.price(&price_req, &ctx).await?;

        for (line, item) in req.items.iter().zip(&priced.items) {
            if let Some(expected) = line.fulfillment_type
                && expected != item.fulfillment_type
            {
                return Err(OrderError::FulfillmentTypeMismatch(item.product_id));
            }
        }
        Ok(priced)
    }

    /// Validate, price, reserve and persist a checkout as `pending_payment`
    pub async fn create(
        &self,
        req: &CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderTree, OrderError> {
        // 1. Owner
        let (user_id, guest_email, guest_password_hash) = match &req.owner {
            OrderOwner::User { user_id } => (Some(*user_id), None, None),
            OrderOwner::Guest { email, password } => {
                if !self.settings.guest_orders_enabled {
                    return Err(OrderError::GuestOrdersDisabled);
                }
                let email = normalize_email(email).ok_or(OrderError::GuestCredentialsRequired)?;
                if password.trim().is_empty() {
                    return Err(OrderError::GuestCredentialsRequired);
                }
                (None, Some(email), Some(hash_order_password(password)?))
            }
        };

        // 2. Price (identical to preview)
        let priced = self.preview(req, now).await?;

        // 3. Buyer-supplied fields
        let mut forms = Vec::with_capacity(priced.items.len());
        for (line, item) in req.items.iter().zip(&priced.items) {
            let form = if item.fulfillment_type == FulfillmentType::Manual {
                validate_manual_form(item.product_id, &item.manual_form, line.manual_form.as_ref())?
            } else {
                Value::Object(Default::default())
            };
            forms.push(form);
        }

        // 4. Reserve every stock-backed line or nothing
        let order_no = self.numbers.next(&self.settings.order_no_prefix);
        let mut lines = Vec::new();
        let mut line_of_item = Vec::with_capacity(priced.items.len());
        for item in &priced.items {
            match stock_target(item.fulfillment_type, item.product_id, item.sku_id) {
                Some(target) => {
                    line_of_item.push(Some(lines.len()));
                    lines.push((target, item.quantity));
                }
                None => line_of_item.push(None),
            }
        }
        let reservations = self.inventory.reserve_all(&order_no, &lines).await?;
        let tokens: Vec<Option<String>> = line_of_item
            .iter()
            .map(|l| l.map(|idx| reservations[idx].token.clone()))
            .collect();

        // 5. Build and persist
        let template = Order {
            id: 0,
            order_no: order_no.clone(),
            parent_id: None,
            user_id,
            guest_email,
            guest_password_hash,
            status: OrderStatus::PendingPayment,
            currency: priced.currency.clone(),
            original_amount: priced.original_amount,
            discount_amount: priced.discount_amount,
            promotion_discount: priced.promotion_discount,
            total_amount: priced.total_amount,
            wallet_paid: Decimal::ZERO,
            online_paid: Decimal::ZERO,
            refunded_amount: Decimal::ZERO,
            coupon_id: priced.coupon_id,
            promotion_id: priced.promotion_id(),
            paid_payment_id: None,
            delivery_text: None,
            expires_at: now + Duration::minutes(self.settings.expire_minutes),
            paid_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let items: Vec<OrderItem> = priced
            .items
            .iter()
            .zip(forms)
            .zip(tokens)
            .map(|((item, form), token)| to_order_item(item, form, token))
            .collect();

        let tree = if items.len() == 1 {
            OrderTree {
                order: template,
                items,
                children: Vec::new(),
            }
        } else {
            let children = items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| OrderTree {
                    order: Order {
                        order_no: format!("{}-{}", order_no, idx + 1),
                        original_amount: item.original_amount,
                        discount_amount: item.coupon_discount,
                        promotion_discount: item.promotion_discount,
                        total_amount: item.total_amount,
                        coupon_id: priced.coupon_id.filter(|_| !item.coupon_discount.is_zero()),
                        promotion_id: item.promotion_id,
                        ..template.clone()
                    },
                    items: vec![item],
                    children: Vec::new(),
                })
                .collect();
            OrderTree {
                order: template,
                items: Vec::new(),
                children,
            }
        };

        match self.store.insert_tree(tree).await {
            Ok(tree) => {
                info!(
                    order_no = %tree.order.order_no,
                    total = %tree.order.total_amount,
                    children = tree.children.len(),
                    "Order created"
                );
                Ok(tree)
            }
            Err(e) => {
                warn!(order_no = %order_no, error = %e, "Order persist failed, releasing stock");
                let tokens: Vec<String> = reservations.into_iter().map(|r| r.token).collect();
                self.inventory.release_tokens(&tokens).await;
                Err(e)
            }
        }
    }

    /// Load an order row with its items and children
    pub async fn tree(&self, order: Order) -> Result<OrderTree, OrderError> {
        let items = self.store.items(order.id).await?;
        let mut children = Vec::new();
        if !order.is_child() {
            for child in self.store.children(order.id).await? {
                let child_items = self.store.items(child.id).await?;
                children.push(OrderTree {
                    order: child,
                    items: child_items,
                    children: Vec::new(),
                });
            }
        }
        Ok(OrderTree {
            order,
            items,
            children,
        })
    }

    pub async fn get_by_no(&self, order_no: &str) -> Result<Order, OrderError> {
        self.store
            .get_by_no(order_no)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(order_no.to_string()))
    }

    pub async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(id.to_string()))
    }

    /// Root of a (possibly child) order
    pub async fn root_of(&self, order: Order) -> Result<Order, OrderError> {
        match order.parent_id {
            Some(parent_id) => self.get(parent_id).await,
            None => Ok(order),
        }
    }

    pub async fn get_for_user(
        &self,
        user_id: UserId,
        order_no: &str,
    ) -> Result<OrderTree, OrderError> {
        let order = self.get_by_no(order_no).await?;
        if order.user_id != Some(user_id) {
            return Err(OrderError::OrderNotFound(order_no.to_string()));
        }
        self.tree(order).await
    }

    /// Guests re-present email and order password on every access
    pub async fn get_for_guest(
        &self,
        email: &str,
        password: &str,
        order_no: &str,
    ) -> Result<OrderTree, OrderError> {
        let order = self.get_by_no(order_no).await?;
        let email = normalize_email(email);
        let authorized = match (&order.guest_email, &order.guest_password_hash) {
            (Some(stored_email), Some(hash)) => {
                email.as_deref() == Some(stored_email.as_str())
                    && verify_order_password(password, hash)
            }
            _ => false,
        };
        if !authorized {
            return Err(OrderError::OrderNotFound(order_no.to_string()));
        }
        self.tree(order).await
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, OrderError> {
        self.store.list_for_user(user_id, limit, offset).await
    }

    pub async fn cancel_for_user(
        &self,
        user_id: UserId,
        order_no: &str,
    ) -> Result<OrderTree, OrderError> {
        let tree = self.get_for_user(user_id, order_no).await?;
        let root = self.root_of(tree.order).await?;
        self.close(root, OrderStatus::Cancelled).await
    }

    pub async fn cancel_for_guest(
        &self,
        email: &str,
        password: &str,
        order_no: &str,
    ) -> Result<OrderTree, OrderError> {
        let tree = self.get_for_guest(email, password, order_no).await?;
        let root = self.root_of(tree.order).await?;
        self.close(root, OrderStatus::Cancelled).await
    }

    /// Expire a root order whose payment window has passed
    pub async fn expire(&self, order: Order, now: DateTime<Utc>) -> Result<OrderTree, OrderError> {
        if order.expires_at > now {
            return Err(OrderError::OrderStatusInvalid {
                order_no: order.order_no,
                status: order.status,
            });
        }
        self.close(order, OrderStatus::Expired).await
    }

    /// Expire overdue orders in one batch. Returns how many were closed.
    pub async fn expire_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<usize, OrderError> {
        let mut expired = 0;
        for order in self.store.find_overdue(now, limit).await? {
            let order_no = order.order_no.clone();
            match self.expire(order, now).await {
                Ok(_) => expired += 1,
                Err(OrderError::OrderCancelNotAllowed(status)) => {
                    debug!(order_no = %order_no, status = %status, "Order left pending before expiry");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    /// `pending_payment -> cancelled | expired` for a root and its children,
    /// then release the reservations
    async fn close(&self, root: Order, to: OrderStatus) -> Result<OrderTree, OrderError> {
        if root.status != OrderStatus::PendingPayment {
            return Err(OrderError::OrderCancelNotAllowed(root.status));
        }
        if !self
            .store
            .transition(root.id, OrderStatus::PendingPayment, to)
            .await?
        {
            let current = self.get(root.id).await?;
            return Err(OrderError::OrderCancelNotAllowed(current.status));
        }
        for child in self.store.children(root.id).await? {
            self.store
                .transition(child.id, OrderStatus::PendingPayment, to)
                .await?;
        }

        let root = self.get(root.id).await?;
        let tree = self.tree(root).await?;
        self.release_reservations(&tree).await;
        info!(order_no = %tree.order.order_no, status = %to, "Order closed");
        Ok(tree)
    }

    /// Release every held reservation of a tree (best effort)
    pub async fn release_reservations(&self, tree: &OrderTree) {
        let tokens: Vec<String> = tree
            .all_items()
            .into_iter()
            .filter_map(|i| i.reservation_token.clone())
            .collect();
        self.inventory.release_tokens(&tokens).await;
    }

    /// Re-reserve items whose reservation was released by a failed payment.
    ///
    /// All-or-nothing: on shortage the fresh reservations are released again.
    /// Items are re-read first and the token swap is a CAS, so two callers
    /// racing on the same order keep exactly one reservation per item.
    pub async fn ensure_reserved(&self, tree: &OrderTree) -> Result<(), OrderError> {
        let tree = self.tree(tree.order.clone()).await?;
        let mut fresh: Vec<(i64, Option<String>, String)> = Vec::new();
        for item in tree.all_items() {
            let Some(target) = stock_target(item.fulfillment_type, item.product_id, item.sku_id)
            else {
                continue;
            };
            if let Some(token) = &item.reservation_token
                && let Some(r) = self.inventory.store().get_reservation(token).await?
                && r.state != ReservationState::Released
            {
                continue;
            }
            match self
                .inventory
                .reserve(&tree.order.order_no, target, item.quantity)
                .await
            {
                Ok(r) => fresh.push((item.id, item.reservation_token.clone(), r.token)),
                Err(e) => {
                    let tokens: Vec<String> = fresh.into_iter().map(|(_, _, t)| t).collect();
                    self.inventory.release_tokens(&tokens).await;
                    return Err(e.into());
                }
            }
        }
        let mut lost: Vec<String> = Vec::new();
        for (item_id, expected, token) in &fresh {
            if !self
                .store
                .set_reservation(*item_id, expected.as_deref(), token)
                .await?
            {
                lost.push(token.clone());
            }
        }
        if !lost.is_empty() {
            self.inventory.release_tokens(&lost).await;
        }
        let renewed = fresh.len() - lost.len();
        if renewed > 0 {
            info!(order_no = %tree.order.order_no, count = renewed, "Reservations renewed");
        }
        Ok(())
    }

    /// Fail unless the root can be paid by `payment_id`
    pub async fn check_settleable(
        &self,
        root_id: OrderId,
        payment_id: PaymentId,
    ) -> Result<Order, OrderError> {
        let root = self.get(root_id).await?;
        match root.status {
            OrderStatus::PendingPayment => Ok(root),
            s if s.is_paid() && root.paid_payment_id == Some(payment_id) => Ok(root),
            status => Err(OrderError::OrderStatusInvalid {
                order_no: root.order_no,
                status,
            }),
        }
    }

    /// `pending_payment -> paid` for the root then its children.
    ///
    /// Re-invoking with the same payment is a no-op.
    pub async fn settle(
        &self,
        root_id: OrderId,
        payment_id: PaymentId,
        wallet_paid: Decimal,
        online_paid: Decimal,
        paid_at: DateTime<Utc>,
    ) -> Result<SettleOutcome, OrderError> {
        let root = self.check_settleable(root_id, payment_id).await?;
        let outcome = if root.status == OrderStatus::PendingPayment {
            if self
                .store
                .mark_paid(root.id, payment_id, wallet_paid, online_paid, paid_at)
                .await?
            {
                SettleOutcome::Settled
            } else {
                // Lost a race: either a concurrent cancel or our own replay
                self.check_settleable(root_id, payment_id).await?;
                SettleOutcome::AlreadyPaid
            }
        } else {
            SettleOutcome::AlreadyPaid
        };

        for child in self.store.children(root.id).await? {
            if child.status == OrderStatus::PendingPayment
                && !self
                    .store
                    .mark_paid(child.id, payment_id, Decimal::ZERO, Decimal::ZERO, paid_at)
                    .await?
            {
                warn!(order_no = %child.order_no, "Child order left its pending state during settlement");
            }
        }
        Ok(outcome)
    }

    /// Commit the reservations of a paid tree and record revealed secrets.
    ///
    /// Replays return the same secrets. A reservation released in between is
    /// taken again before committing.
    pub async fn commit_stock(&self, tree: &OrderTree) -> Result<Vec<Delivery>, OrderError> {
        let mut deliveries = Vec::new();
        let mut rows: Vec<(&Order, &OrderItem)> = tree.items.iter().map(|i| (&tree.order, i)).collect();
        for child in &tree.children {
            rows.extend(child.items.iter().map(|i| (&child.order, i)));
        }

        for (order, item) in rows {
            let Some(target) = stock_target(item.fulfillment_type, item.product_id, item.sku_id)
            else {
                continue;
            };
            let outcome = match &item.reservation_token {
                Some(token) => match self.inventory.commit(token).await {
                    Err(InventoryError::ReservationReleased(_))
                    | Err(InventoryError::ReservationNotFound(_)) => None,
                    other => Some(other?),
                },
                None => None,
            };
            let outcome = match outcome {
                Some(o) => o,
                None => {
                    let r = self
                        .inventory
                        .reserve(&tree.order.order_no, target, item.quantity)
                        .await?;
                    if !self
                        .store
                        .set_reservation(item.id, item.reservation_token.as_deref(), &r.token)
                        .await?
                    {
                        warn!(order_no = %order.order_no, item_id = item.id, "Reservation token changed during fulfillment");
                    }
                    self.inventory.commit(&r.token).await?
                }
            };
            if item.fulfillment_type == FulfillmentType::Auto {
                self.store.record_delivery(item.id, &outcome.secrets).await?;
                deliveries.push(Delivery {
                    order_no: order.order_no.clone(),
                    item_id: item.id,
                    secrets: outcome.secrets,
                });
            }
        }
        Ok(deliveries)
    }

    /// Complete paid rows that need no manual work.
    ///
    /// Rows whose items are all card-secret or no-fulfillment finish here;
    /// the root follows once every child is completed.
    pub async fn complete_automatic(&self, root_id: OrderId) -> Result<(), OrderError> {
        let root = self.get(root_id).await?;
        let tree = self.tree(root).await?;
        for child in &tree.children {
            self.complete_if_automatic(child).await?;
        }
        if tree.children.is_empty() {
            self.complete_if_automatic(&tree).await?;
        } else {
            self.sync_parent(tree.order.id).await?;
        }
        Ok(())
    }

    async fn complete_if_automatic(&self, node: &OrderTree) -> Result<(), OrderError> {
        let automatic = node
            .items
            .iter()
            .all(|i| i.fulfillment_type != FulfillmentType::Manual);
        if !automatic || node.order.status != OrderStatus::Paid {
            return Ok(());
        }
        let secrets: Vec<&str> = node
            .items
            .iter()
            .flat_map(|i| i.delivered_secrets.iter().map(String::as_str))
            .collect();
        let text = (!secrets.is_empty()).then(|| secrets.join("\n"));
        if self
            .store
            .complete(node.order.id, OrderStatus::Paid, text.as_deref())
            .await?
        {
            info!(order_no = %node.order.order_no, "Order completed automatically");
        }
        Ok(())
    }

    /// Move a parent forward to match its children
    async fn sync_parent(&self, parent_id: OrderId) -> Result<(), OrderError> {
        let parent = self.get(parent_id).await?;
        let children = self.store.children(parent_id).await?;
        if children.is_empty() {
            return Ok(());
        }
        if children.iter().all(|c| c.status == OrderStatus::Completed) {
            if matches!(parent.status, OrderStatus::Paid | OrderStatus::Fulfilling) {
                self.store.complete(parent.id, parent.status, None).await?;
            }
        } else if parent.status == OrderStatus::Paid
            && children.iter().any(|c| c.status == OrderStatus::Fulfilling)
        {
            self.store
                .transition(parent.id, OrderStatus::Paid, OrderStatus::Fulfilling)
                .await?;
        }
        Ok(())
    }

    /// Admin: `paid -> fulfilling`
    pub async fn mark_fulfilling(&self, order_no: &str) -> Result<Order, OrderError> {
        let order = self.get_by_no(order_no).await?;
        if !self
            .store
            .transition(order.id, OrderStatus::Paid, OrderStatus::Fulfilling)
            .await?
        {
            return Err(OrderError::OrderStatusInvalid {
                order_no: order.order_no,
                status: order.status,
            });
        }
        if let Some(parent_id) = order.parent_id {
            self.sync_parent(parent_id).await?;
        }
        self.get(order.id).await
    }

    /// Admin: `paid | fulfilling -> completed` with delivery text
    pub async fn complete_fulfillment(
        &self,
        order_no: &str,
        delivery_text: &str,
    ) -> Result<Order, OrderError> {
        let order = self.get_by_no(order_no).await?;
        if !matches!(order.status, OrderStatus::Paid | OrderStatus::Fulfilling)
            || !self
                .store
                .complete(order.id, order.status, Some(delivery_text))
                .await?
        {
            return Err(OrderError::OrderStatusInvalid {
                order_no: order.order_no,
                status: order.status,
            });
        }
        if let Some(parent_id) = order.parent_id {
            self.sync_parent(parent_id).await?;
        }
        info!(order_no = %order.order_no, "Manual fulfillment completed");
        self.get(order.id).await
    }

    /// Record a refund against a root order.
    ///
    /// A full refund moves `paid | fulfilling` rows to `refunded`; a completed
    /// order only tracks the refunded amount. Keyed by `request_id`, so a
    /// retried request is recorded once.
    pub async fn apply_refund(
        &self,
        order_no: &str,
        amount: Decimal,
        request_id: &str,
    ) -> Result<Order, OrderError> {
        let order = self.get_by_no(order_no).await?;
        if order.is_child() || !order.status.is_paid() || amount <= Decimal::ZERO {
            return Err(OrderError::RefundNotAllowed);
        }
        let updated = match self.store.add_refund(order.id, request_id, amount).await? {
            RefundRecord::Applied(updated) => updated,
            RefundRecord::Replayed { order, amount: recorded } if recorded == amount => {
                debug!(order_no = %order_no, request_id, "Refund request replayed");
                order
            }
            RefundRecord::Replayed { .. } => {
                return Err(OrderError::RefundRequestConflict(request_id.to_string()));
            }
            RefundRecord::Exceeds if order.status == OrderStatus::Refunded => {
                return Err(OrderError::RefundNotAllowed);
            }
            RefundRecord::Exceeds => return Err(OrderError::RefundExceedsPaid),
        };

        if updated.refundable().is_zero() {
            for row in std::iter::once(updated.clone()).chain(self.store.children(updated.id).await?) {
                if matches!(row.status, OrderStatus::Paid | OrderStatus::Fulfilling) {
                    self.store
                        .transition(row.id, row.status, OrderStatus::Refunded)
                        .await?;
                }
            }
        }
        info!(order_no = %order_no, amount = %amount, "Refund recorded");
        self.get(updated.id).await
    }
}

/// Stock a fulfillment type draws from; `None` needs no stock
pub fn stock_target(
    fulfillment: FulfillmentType,
    product_id: ProductId,
    sku_id: Option<SkuId>,
) -> Option<StockTarget> {
    match fulfillment {
        FulfillmentType::Manual => Some(StockTarget::Product(product_id)),
        FulfillmentType::Auto => sku_id.map(StockTarget::Sku),
        FulfillmentType::None => None,
    }
}

fn to_order_item(item: &PricedItem, manual_form: Value, reservation_token: Option<String>) -> OrderItem {
    OrderItem {
        id: 0,
        order_id: 0,
        product_id: item.product_id,
        sku_id: item.sku_id,
        name: item.name.clone(),
        quantity: item.quantity,
        fulfillment_type: item.fulfillment_type,
        unit_price: item.unit_price,
        original_amount: item.original_amount,
        promotion_id: item.promotion_id,
        promotion_discount: item.promotion_discount,
        coupon_discount: item.coupon_discount,
        total_amount: item.total_amount,
        manual_form,
        reservation_token,
        delivered_secrets: Vec::new(),
    }
}
