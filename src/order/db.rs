//! PostgreSQL order store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::error::OrderError;
use super::state::OrderStatus;
use super::types::{Order, OrderItem, OrderTree, RefundRecord};
use super::OrderStore;
use crate::catalog::FulfillmentType;
use crate::core_types::{Currency, OrderId, OrderItemId, PaymentId, UserId};

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &PgRow) -> Result<Order, OrderError> {
        let status: i16 = row.try_get("status")?;
        let currency: String = row.try_get("currency")?;
        Ok(Order {
            id: row.try_get("id")?,
            order_no: row.try_get("order_no")?,
            parent_id: row.try_get("parent_id")?,
            user_id: row.try_get("user_id")?,
            guest_email: row.try_get("guest_email")?,
            guest_password_hash: row.try_get("guest_password_hash")?,
            status: OrderStatus::from_id(status)
                .ok_or_else(|| OrderError::DatabaseError(format!("bad order status {status}")))?,
            currency: Currency::new(&currency),
            original_amount: row.try_get("original_amount")?,
            discount_amount: row.try_get("discount_amount")?,
            promotion_discount: row.try_get("promotion_discount")?,
            total_amount: row.try_get("total_amount")?,
            wallet_paid: row.try_get("wallet_paid")?,
            online_paid: row.try_get("online_paid")?,
            refunded_amount: row.try_get("refunded_amount")?,
            coupon_id: row.try_get("coupon_id")?,
            promotion_id: row.try_get("promotion_id")?,
            paid_payment_id: row.try_get("paid_payment_id")?,
            delivery_text: row.try_get("delivery_text")?,
            expires_at: row.try_get("expires_at")?,
            paid_at: row.try_get("paid_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem, OrderError> {
        let fulfillment: String = row.try_get("fulfillment_type")?;
        let Json(manual_form): Json<serde_json::Value> = row.try_get("manual_form")?;
        Ok(OrderItem {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            product_id: row.try_get("product_id")?,
            sku_id: row.try_get("sku_id")?,
            name: row.try_get("name")?,
            quantity: row.try_get("quantity")?,
            fulfillment_type: FulfillmentType::parse(&fulfillment).ok_or_else(|| {
                OrderError::DatabaseError(format!("bad fulfillment type {fulfillment}"))
            })?,
            unit_price: row.try_get("unit_price")?,
            original_amount: row.try_get("original_amount")?,
            promotion_id: row.try_get("promotion_id")?,
            promotion_discount: row.try_get("promotion_discount")?,
            coupon_discount: row.try_get("coupon_discount")?,
            total_amount: row.try_get("total_amount")?,
            manual_form,
            reservation_token: row.try_get("reservation_token")?,
            delivered_secrets: row.try_get("delivered_secrets")?,
        })
    }

    async fn insert_node(
        tx: &mut Transaction<'_, Postgres>,
        order: &mut Order,
        items: &mut [OrderItem],
        parent_id: Option<OrderId>,
    ) -> Result<(), OrderError> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders_tb (
                order_no, parent_id, user_id, guest_email, guest_password_hash, status, currency,
                original_amount, discount_amount, promotion_discount, total_amount,
                wallet_paid, online_paid, refunded_amount, coupon_id, promotion_id,
                expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $18)
            RETURNING id
            "#,
        )
        .bind(&order.order_no)
        .bind(parent_id)
        .bind(order.user_id)
        .bind(&order.guest_email)
        .bind(&order.guest_password_hash)
        .bind(order.status.id())
        .bind(order.currency.as_str())
        .bind(order.original_amount)
        .bind(order.discount_amount)
        .bind(order.promotion_discount)
        .bind(order.total_amount)
        .bind(order.wallet_paid)
        .bind(order.online_paid)
        .bind(order.refunded_amount)
        .bind(order.coupon_id)
        .bind(order.promotion_id)
        .bind(order.expires_at)
        .bind(order.created_at)
        .fetch_one(&mut **tx)
        .await?;
        order.id = row.try_get("id")?;
        order.parent_id = parent_id;

        for item in items.iter_mut() {
            let row = sqlx::query(
                r#"
                INSERT INTO order_items_tb (
                    order_id, product_id, sku_id, name, quantity, fulfillment_type, unit_price,
                    original_amount, promotion_id, promotion_discount, coupon_discount,
                    total_amount, manual_form, reservation_token, delivered_secrets
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                RETURNING id
                "#,
            )
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.sku_id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.fulfillment_type.as_str())
            .bind(item.unit_price)
            .bind(item.original_amount)
            .bind(item.promotion_id)
            .bind(item.promotion_discount)
            .bind(item.coupon_discount)
            .bind(item.total_amount)
            .bind(Json(&item.manual_form))
            .bind(&item.reservation_token)
            .bind(&item.delivered_secrets)
            .fetch_one(&mut **tx)
            .await?;
            item.id = row.try_get("id")?;
            item.order_id = order.id;
        }
        Ok(())
    }

    async fn fetch_orders(
        &self,
        sql: &'static str,
        bind: i64,
    ) -> Result<Vec<Order>, OrderError> {
        let rows = sqlx::query(sql).bind(bind).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_order).collect()
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert_tree(&self, mut tree: OrderTree) -> Result<OrderTree, OrderError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_node(&mut tx, &mut tree.order, &mut tree.items, None).await?;
        let parent_id = tree.order.id;
        for child in &mut tree.children {
            Self::insert_node(&mut tx, &mut child.order, &mut child.items, Some(parent_id))
                .await?;
        }
        tx.commit().await?;
        Ok(tree)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query("SELECT * FROM orders_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn get_by_no(&self, order_no: &str) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query("SELECT * FROM orders_tb WHERE order_no = $1")
            .bind(order_no)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn children(&self, parent_id: OrderId) -> Result<Vec<Order>, OrderError> {
        self.fetch_orders(
            "SELECT * FROM orders_tb WHERE parent_id = $1 ORDER BY id",
            parent_id,
        )
        .await
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, OrderError> {
        let rows = sqlx::query("SELECT * FROM order_items_tb WHERE order_id = $1 ORDER BY id")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_item).collect()
    }

    async fn transition(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            "UPDATE orders_tb SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(to.id())
        .bind(id)
        .bind(from.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_paid(
        &self,
        id: OrderId,
        payment_id: PaymentId,
        wallet_paid: Decimal,
        online_paid: Decimal,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE orders_tb
            SET status = $1, paid_payment_id = $2, wallet_paid = $3, online_paid = $4,
                paid_at = $5, updated_at = $5
            WHERE id = $6 AND status = $7
            "#,
        )
        .bind(OrderStatus::Paid.id())
        .bind(payment_id)
        .bind(wallet_paid)
        .bind(online_paid)
        .bind(paid_at)
        .bind(id)
        .bind(OrderStatus::PendingPayment.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(
        &self,
        id: OrderId,
        from: OrderStatus,
        delivery_text: Option<&str>,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE orders_tb
            SET status = $1, delivery_text = COALESCE($2, delivery_text),
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(OrderStatus::Completed.id())
        .bind(delivery_text)
        .bind(id)
        .bind(from.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_reservation(
        &self,
        item_id: OrderItemId,
        expected: Option<&str>,
        token: &str,
    ) -> Result<bool, OrderError> {
        let result = sqlx::query(
            "UPDATE order_items_tb SET reservation_token = $1 \
             WHERE id = $2 AND reservation_token IS NOT DISTINCT FROM $3",
        )
        .bind(token)
        .bind(item_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_delivery(
        &self,
        item_id: OrderItemId,
        secrets: &[String],
    ) -> Result<(), OrderError> {
        sqlx::query("UPDATE order_items_tb SET delivered_secrets = $1 WHERE id = $2")
            .bind(secrets)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_refund(
        &self,
        id: OrderId,
        request_id: &str,
        amount: Decimal,
    ) -> Result<RefundRecord, OrderError> {
        let mut tx = self.pool.begin().await?;
        let fresh = sqlx::query(
            r#"
            INSERT INTO order_refunds_tb (order_id, request_id, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_id, request_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(request_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !fresh {
            let recorded: Decimal = sqlx::query_scalar(
                "SELECT amount FROM order_refunds_tb WHERE order_id = $1 AND request_id = $2",
            )
            .bind(id)
            .bind(request_id)
            .fetch_one(&mut *tx)
            .await?;
            let row = sqlx::query("SELECT * FROM orders_tb WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(RefundRecord::Replayed {
                order: Self::row_to_order(&row)?,
                amount: recorded,
            });
        }

        let row = sqlx::query(
            r#"
            UPDATE orders_tb
            SET refunded_amount = refunded_amount + $1, updated_at = NOW()
            WHERE id = $2 AND refunded_amount + $1 <= wallet_paid + online_paid
            RETURNING *
            "#,
        )
        .bind(amount)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        match row {
            Some(row) => {
                let order = Self::row_to_order(&row)?;
                tx.commit().await?;
                Ok(RefundRecord::Applied(order))
            }
            None => {
                tx.rollback().await?;
                Ok(RefundRecord::Exceeds)
            }
        }
    }

    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, OrderError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders_tb
            WHERE parent_id IS NULL AND status = $1 AND expires_at <= $2
            ORDER BY expires_at, id
            LIMIT $3
            "#,
        )
        .bind(OrderStatus::PendingPayment.id())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, OrderError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders_tb
            WHERE user_id = $1 AND parent_id IS NULL
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_order).collect()
    }
}
