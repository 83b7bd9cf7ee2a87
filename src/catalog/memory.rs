//! In-process catalog used by tests and by database-less deployments

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::{Coupon, Product, Promotion, Sku, UsageOutcome};
use super::{CatalogError, CatalogStore};
use crate::core_types::{CouponId, OrderId, ProductId, PromotionId, SkuId, UserId};

#[derive(Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    skus: HashMap<SkuId, Sku>,
    coupons: HashMap<CouponId, Coupon>,
    coupon_uses: HashMap<(CouponId, OrderId), Option<UserId>>,
    promotions: HashMap<PromotionId, Promotion>,
    promotion_uses: HashSet<(PromotionId, OrderId)>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert_product(&self, product: Product) {
        self.lock().products.insert(product.id, product);
    }

    pub fn upsert_sku(&self, sku: Sku) {
        self.lock().skus.insert(sku.id, sku);
    }

    pub fn upsert_coupon(&self, coupon: Coupon) {
        self.lock().coupons.insert(coupon.id, coupon);
    }

    pub fn upsert_promotion(&self, promotion: Promotion) {
        self.lock().promotions.insert(promotion.id, promotion);
    }

    pub fn coupon(&self, id: CouponId) -> Option<Coupon> {
        self.lock().coupons.get(&id).cloned()
    }

    pub fn promotion(&self, id: PromotionId) -> Option<Promotion> {
        self.lock().promotions.get(&id).cloned()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, CatalogError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn get_sku(&self, id: SkuId) -> Result<Option<Sku>, CatalogError> {
        Ok(self.lock().skus.get(&id).cloned())
    }

    async fn get_coupon(&self, id: CouponId) -> Result<Option<Coupon>, CatalogError> {
        Ok(self.lock().coupons.get(&id).cloned())
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, CatalogError> {
        let code = code.trim();
        Ok(self
            .lock()
            .coupons
            .values()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn coupon_uses_by_user(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<i64, CatalogError> {
        let state = self.lock();
        Ok(state
            .coupon_uses
            .iter()
            .filter(|((cid, _), uid)| *cid == coupon_id && **uid == Some(user_id))
            .count() as i64)
    }

    async fn promotions_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Promotion>, CatalogError> {
        let mut promos: Vec<Promotion> = self
            .lock()
            .promotions
            .values()
            .filter(|p| p.product_id == product_id && p.active)
            .cloned()
            .collect();
        promos.sort_by_key(|p| p.id);
        Ok(promos)
    }

    async fn record_coupon_use(
        &self,
        coupon_id: CouponId,
        order_id: OrderId,
        user_id: Option<UserId>,
    ) -> Result<UsageOutcome, CatalogError> {
        let mut state = self.lock();
        if state.coupon_uses.contains_key(&(coupon_id, order_id)) {
            return Ok(UsageOutcome::AlreadyApplied);
        }
        let user_uses = user_id.map(|uid| {
            state
                .coupon_uses
                .iter()
                .filter(|((cid, _), u)| *cid == coupon_id && **u == Some(uid))
                .count() as i64
        });
        let Some(coupon) = state.coupons.get_mut(&coupon_id) else {
            return Ok(UsageOutcome::LimitReached);
        };
        if coupon.limit_reached() {
            return Ok(UsageOutcome::LimitReached);
        }
        if let (Some(limit), Some(used)) = (coupon.per_user_limit, user_uses)
            && limit > 0
            && used >= limit
        {
            return Ok(UsageOutcome::LimitReached);
        }
        coupon.used_count += 1;
        state.coupon_uses.insert((coupon_id, order_id), user_id);
        Ok(UsageOutcome::Applied)
    }

    async fn record_promotion_use(
        &self,
        promotion_id: PromotionId,
        order_id: OrderId,
    ) -> Result<UsageOutcome, CatalogError> {
        let mut state = self.lock();
        if state.promotion_uses.contains(&(promotion_id, order_id)) {
            return Ok(UsageOutcome::AlreadyApplied);
        }
        let Some(promo) = state.promotions.get_mut(&promotion_id) else {
            return Ok(UsageOutcome::LimitReached);
        };
        if matches!(promo.usage_limit, Some(limit) if limit > 0 && promo.used_count >= limit) {
            return Ok(UsageOutcome::LimitReached);
        }
        promo.used_count += 1;
        state.promotion_uses.insert((promotion_id, order_id));
        Ok(UsageOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::DiscountType;
    use crate::core_types::Currency;
    use rust_decimal::Decimal;

    fn coupon(limit: Option<i64>, per_user: Option<i64>) -> Coupon {
        Coupon {
            id: 1,
            code: "SAVE10".into(),
            discount_type: DiscountType::Fixed,
            value: Decimal::TEN,
            max_discount: None,
            min_amount: Decimal::ZERO,
            currency: Currency::new("CNY"),
            scope_product_ids: vec![],
            scope_sku_ids: vec![],
            usage_limit: limit,
            per_user_limit: per_user,
            used_count: 0,
            starts_at: None,
            ends_at: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_coupon_use_counted_once_per_order() {
        let cat = MemoryCatalog::new();
        cat.upsert_coupon(coupon(Some(5), None));

        assert_eq!(
            cat.record_coupon_use(1, 100, Some(7)).await.unwrap(),
            UsageOutcome::Applied
        );
        assert_eq!(
            cat.record_coupon_use(1, 100, Some(7)).await.unwrap(),
            UsageOutcome::AlreadyApplied
        );
        assert_eq!(cat.coupon(1).unwrap().used_count, 1);
    }

    #[tokio::test]
    async fn test_coupon_global_and_per_user_limits() {
        let cat = MemoryCatalog::new();
        cat.upsert_coupon(coupon(Some(1), None));
        assert_eq!(
            cat.record_coupon_use(1, 1, None).await.unwrap(),
            UsageOutcome::Applied
        );
        assert_eq!(
            cat.record_coupon_use(1, 2, None).await.unwrap(),
            UsageOutcome::LimitReached
        );

        let cat = MemoryCatalog::new();
        cat.upsert_coupon(coupon(None, Some(1)));
        assert_eq!(
            cat.record_coupon_use(1, 1, Some(9)).await.unwrap(),
            UsageOutcome::Applied
        );
        assert_eq!(
            cat.record_coupon_use(1, 2, Some(9)).await.unwrap(),
            UsageOutcome::LimitReached
        );
        assert_eq!(
            cat.record_coupon_use(1, 3, Some(10)).await.unwrap(),
            UsageOutcome::Applied
        );
        assert_eq!(cat.coupon_uses_by_user(1, 9).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_coupon_case_insensitive() {
        let cat = MemoryCatalog::new();
        cat.upsert_coupon(coupon(None, None));
        assert!(cat.find_coupon("save10").await.unwrap().is_some());
        assert!(cat.find_coupon("nope").await.unwrap().is_none());
    }
}
