//! PostgreSQL catalog reader and usage counters

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::types::{
    Coupon, DiscountType, FulfillmentType, ManualFormField, Product, Promotion, Sku, UsageOutcome,
};
use super::{CatalogError, CatalogStore};
use crate::core_types::{CouponId, Currency, OrderId, ProductId, PromotionId, SkuId, UserId};

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn discount_type(row: &PgRow) -> Result<DiscountType, CatalogError> {
        let raw: String = row.try_get("discount_type")?;
        DiscountType::parse(&raw).ok_or_else(|| CatalogError::CorruptRow(format!("discount_type={raw}")))
    }

    fn row_to_coupon(row: &PgRow) -> Result<Coupon, CatalogError> {
        let currency: String = row.try_get("currency")?;
        Ok(Coupon {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            discount_type: Self::discount_type(row)?,
            value: row.try_get("value")?,
            max_discount: row.try_get("max_discount")?,
            min_amount: row.try_get("min_amount")?,
            currency: Currency::new(&currency),
            scope_product_ids: row.try_get("scope_product_ids")?,
            scope_sku_ids: row.try_get("scope_sku_ids")?,
            usage_limit: row.try_get("usage_limit")?,
            per_user_limit: row.try_get("per_user_limit")?,
            used_count: row.try_get("used_count")?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            active: row.try_get("active")?,
        })
    }

    fn row_to_promotion(row: &PgRow) -> Result<Promotion, CatalogError> {
        Ok(Promotion {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            product_id: row.try_get("product_id")?,
            sku_id: row.try_get("sku_id")?,
            discount_type: Self::discount_type(row)?,
            value: row.try_get("value")?,
            min_amount: row.try_get("min_amount")?,
            usage_limit: row.try_get("usage_limit")?,
            used_count: row.try_get("used_count")?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            active: row.try_get("active")?,
        })
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, price, currency, active, fulfillment_type, manual_form
            FROM products_tb WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let fulfillment: String = row.try_get("fulfillment_type")?;
        let currency: String = row.try_get("currency")?;
        let Json(manual_form): Json<Vec<ManualFormField>> = row.try_get("manual_form")?;
        Ok(Some(Product {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            currency: Currency::new(&currency),
            active: row.try_get("active")?,
            fulfillment_type: FulfillmentType::parse(&fulfillment)
                .ok_or_else(|| CatalogError::CorruptRow(format!("fulfillment_type={fulfillment}")))?,
            manual_form,
        }))
    }

    async fn get_sku(&self, id: SkuId) -> Result<Option<Sku>, CatalogError> {
        let row = sqlx::query("SELECT id, product_id, name, price, active FROM skus_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Sku {
                id: row.try_get("id")?,
                product_id: row.try_get("product_id")?,
                name: row.try_get("name")?,
                price: row.try_get("price")?,
                active: row.try_get("active")?,
            })),
            None => Ok(None),
        }
    }

    async fn get_coupon(&self, id: CouponId) -> Result<Option<Coupon>, CatalogError> {
        let row = sqlx::query("SELECT * FROM coupons_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_coupon).transpose()
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, CatalogError> {
        let row = sqlx::query("SELECT * FROM coupons_tb WHERE lower(code) = lower($1)")
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_coupon).transpose()
    }

    async fn coupon_uses_by_user(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<i64, CatalogError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM coupon_usages_tb WHERE coupon_id = $1 AND user_id = $2",
        )
        .bind(coupon_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn promotions_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Promotion>, CatalogError> {
        let rows = sqlx::query(
            "SELECT * FROM promotions_tb WHERE product_id = $1 AND active = TRUE ORDER BY id",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_promotion).collect()
    }

    async fn record_coupon_use(
        &self,
        coupon_id: CouponId,
        order_id: OrderId,
        user_id: Option<UserId>,
    ) -> Result<UsageOutcome, CatalogError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO coupon_usages_tb (coupon_id, order_id, user_id, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (coupon_id, order_id) DO NOTHING
            "#,
        )
        .bind(coupon_id)
        .bind(order_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(UsageOutcome::AlreadyApplied);
        }

        // Row lock on the coupon serializes concurrent settlements.
        let updated = sqlx::query(
            r#"
            UPDATE coupons_tb SET used_count = used_count + 1
            WHERE id = $1
              AND (usage_limit IS NULL OR usage_limit <= 0 OR used_count < usage_limit)
              AND (per_user_limit IS NULL OR per_user_limit <= 0 OR $2::BIGINT IS NULL OR
                   (SELECT COUNT(*) FROM coupon_usages_tb u
                    WHERE u.coupon_id = $1 AND u.user_id = $2) <= per_user_limit)
            "#,
        )
        .bind(coupon_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(UsageOutcome::LimitReached);
        }
        tx.commit().await?;
        Ok(UsageOutcome::Applied)
    }

    async fn record_promotion_use(
        &self,
        promotion_id: PromotionId,
        order_id: OrderId,
    ) -> Result<UsageOutcome, CatalogError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO promotion_usages_tb (promotion_id, order_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (promotion_id, order_id) DO NOTHING
            "#,
        )
        .bind(promotion_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(UsageOutcome::AlreadyApplied);
        }

        let updated = sqlx::query(
            r#"
            UPDATE promotions_tb SET used_count = used_count + 1
            WHERE id = $1 AND (usage_limit IS NULL OR usage_limit <= 0 OR used_count < usage_limit)
            "#,
        )
        .bind(promotion_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(UsageOutcome::LimitReached);
        }
        tx.commit().await?;
        Ok(UsageOutcome::Applied)
    }
}
