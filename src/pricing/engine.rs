use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::error::PricingError;
use super::types::{PriceRequest, PricedItem, PricedOrder, PromotionContext};
use crate::catalog::{CatalogStore, Coupon, DiscountType, FulfillmentType, Promotion};
use crate::inventory::{InventoryStore, StockTarget};
use crate::money::{percent_of, round_amount};

pub struct PricingEngine {
    catalog: Arc<dyn CatalogStore>,
    inventory: Arc<dyn InventoryStore>,
}

impl PricingEngine {
    pub fn new(catalog: Arc<dyn CatalogStore>, inventory: Arc<dyn InventoryStore>) -> Self {
        Self { catalog, inventory }
    }

    pub async fn price(
        &self,
        req: &PriceRequest,
        ctx: &PromotionContext,
    ) -> Result<PricedOrder, PricingError> {
        if req.items.is_empty() {
            return Err(PricingError::EmptyItems);
        }

        let mut items = Vec::with_capacity(req.items.len());
        let mut requested_promotion_used = false;

        for line in &req.items {
            if line.quantity <= 0 {
                return Err(PricingError::InvalidQuantity);
            }
            let product = self
                .catalog
                .get_product(line.product_id)
                .await?
                .filter(|p| p.active)
                .ok_or(PricingError::ProductNotAvailable(line.product_id))?;

            if !product.currency.matches(req.currency.as_str()) {
                return Err(PricingError::OrderCurrencyMismatch {
                    expected: req.currency.to_string(),
                    actual: product.currency.to_string(),
                });
            }

            let (name, unit_price) = match line.sku_id {
                Some(sku_id) => {
                    let sku = self
                        .catalog
                        .get_sku(sku_id)
                        .await?
                        .filter(|s| s.active && s.product_id == product.id)
                        .ok_or(PricingError::ProductNotAvailable(product.id))?;
                    (
                        format!("{} - {}", product.name, sku.name),
                        sku.price.unwrap_or(product.price),
                    )
                }
                None if product.fulfillment_type == FulfillmentType::Auto => {
                    return Err(PricingError::SkuRequired(product.id));
                }
                None => (product.name.clone(), product.price),
            };
            if unit_price <= Decimal::ZERO {
                return Err(PricingError::ProductPriceInvalid(product.id));
            }

            let original_amount = round_amount(unit_price * Decimal::from(line.quantity));
            let promotions = self.catalog.promotions_for_product(product.id).await?;
            let best = best_promotion(&promotions, line.sku_id, unit_price, line.quantity, ctx);
            let (promotion_id, promotion_discount) = match best {
                Some((p, d)) => {
                    if ctx.promotion_id == Some(p.id) {
                        requested_promotion_used = true;
                    }
                    (Some(p.id), d)
                }
                None => (None, Decimal::ZERO),
            };

            let target = match line.sku_id {
                Some(sku_id) if product.fulfillment_type == FulfillmentType::Auto => {
                    StockTarget::Sku(sku_id)
                }
                _ => StockTarget::Product(product.id),
            };
            let in_stock = match product.fulfillment_type {
                FulfillmentType::None => true,
                _ => self.inventory.counters(target).await?.can_reserve(line.quantity),
            };

            items.push(PricedItem {
                product_id: product.id,
                sku_id: line.sku_id,
                name,
                fulfillment_type: product.fulfillment_type,
                quantity: line.quantity,
                unit_price,
                original_amount,
                promotion_id,
                promotion_discount,
                coupon_discount: Decimal::ZERO,
                total_amount: original_amount - promotion_discount,
                in_stock,
                manual_form: product.manual_form.clone(),
            });
        }

        if ctx.promotion_id.is_some() && !requested_promotion_used {
            return Err(PricingError::PromotionInvalid);
        }

        let mut coupon_id = None;
        let mut coupon_code = None;
        let mut discount_amount = Decimal::ZERO;
        if let Some(code) = req.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            let coupon = self.load_coupon(code, req, ctx).await?;
            discount_amount = apply_coupon(&coupon, &mut items)?;
            coupon_id = Some(coupon.id);
            coupon_code = Some(coupon.code);
        }

        let original_amount: Decimal = items.iter().map(|i| i.original_amount).sum();
        let promotion_discount: Decimal = items.iter().map(|i| i.promotion_discount).sum();
        let total_amount = original_amount - discount_amount - promotion_discount;

        debug!(
            items = items.len(),
            original = %original_amount,
            promotion = %promotion_discount,
            coupon = %discount_amount,
            total = %total_amount,
            "Order priced"
        );

        Ok(PricedOrder {
            currency: req.currency.clone(),
            items,
            original_amount,
            promotion_discount,
            discount_amount,
            total_amount,
            coupon_id,
            coupon_code,
        })
    }

    async fn load_coupon(
        &self,
        code: &str,
        req: &PriceRequest,
        ctx: &PromotionContext,
    ) -> Result<Coupon, PricingError> {
        let coupon = self
            .catalog
            .find_coupon(code)
            .await?
            .filter(|c| c.active)
            .ok_or(PricingError::CouponInvalid)?;

        if coupon.starts_at.is_some_and(|s| s > ctx.now) {
            return Err(PricingError::CouponInvalid);
        }
        if coupon.ends_at.is_some_and(|e| e <= ctx.now) {
            return Err(PricingError::CouponExpired);
        }
        if !coupon.currency.matches(req.currency.as_str()) {
            return Err(PricingError::OrderCurrencyMismatch {
                expected: req.currency.to_string(),
                actual: coupon.currency.to_string(),
            });
        }
        if coupon.limit_reached() {
            return Err(PricingError::CouponUsageLimit);
        }
        if let (Some(limit), Some(user_id)) = (coupon.per_user_limit, req.user_id)
            && limit > 0
            && self.catalog.coupon_uses_by_user(coupon.id, user_id).await? >= limit
        {
            return Err(PricingError::CouponPerUserLimit);
        }
        Ok(coupon)
    }
}

/// Per-line discount a promotion yields, `None` when not eligible
fn promotion_discount(
    promo: &Promotion,
    unit_price: Decimal,
    quantity: i64,
) -> Option<Decimal> {
    let line = unit_price * Decimal::from(quantity);
    if line < promo.min_amount {
        return None;
    }
    let per_unit = match promo.discount_type {
        DiscountType::Fixed => promo.value.min(unit_price),
        DiscountType::Percentage => percent_of(unit_price, promo.value).min(unit_price),
    };
    let discount = round_amount(per_unit * Decimal::from(quantity));
    (discount > Decimal::ZERO).then_some(discount)
}

/// Best live promotion for one line; ties go to the lowest id
fn best_promotion<'a>(
    promotions: &'a [Promotion],
    sku_id: Option<i64>,
    unit_price: Decimal,
    quantity: i64,
    ctx: &PromotionContext,
) -> Option<(&'a Promotion, Decimal)> {
    let mut best: Option<(&Promotion, Decimal)> = None;
    for p in promotions {
        if !p.is_live(ctx.now) || !p.applies_to(p.product_id, sku_id) {
            continue;
        }
        let Some(d) = promotion_discount(p, unit_price, quantity) else {
            continue;
        };
        if best.is_none_or(|(_, cur)| d > cur) {
            best = Some((p, d));
        }
    }
    best
}

/// Apply one coupon to the promotion-adjusted lines, spreading the discount
/// over covered lines in proportion to their totals.
fn apply_coupon(coupon: &Coupon, items: &mut [PricedItem]) -> Result<Decimal, PricingError> {
    let covered: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, i)| coupon.covers(i.product_id, i.sku_id))
        .map(|(idx, _)| idx)
        .collect();
    if covered.is_empty() {
        return Err(PricingError::CouponScopeInvalid);
    }

    let eligible: Decimal = covered.iter().map(|&i| items[i].total_amount).sum();
    if eligible < coupon.min_amount || eligible <= Decimal::ZERO {
        return Err(PricingError::CouponMinAmount);
    }

    let mut discount = match coupon.discount_type {
        DiscountType::Fixed => coupon.value,
        DiscountType::Percentage => {
            let d = percent_of(eligible, coupon.value);
            match coupon.max_discount {
                Some(cap) if cap > Decimal::ZERO => d.min(cap),
                _ => d,
            }
        }
    };
    discount = round_amount(discount.min(eligible).max(Decimal::ZERO));

    let mut remaining = discount;
    for (pos, &idx) in covered.iter().enumerate() {
        let share = if pos + 1 == covered.len() {
            remaining
        } else {
            round_amount(discount * items[idx].total_amount / eligible).min(remaining)
        };
        let share = share.min(items[idx].total_amount);
        items[idx].coupon_discount = share;
        items[idx].total_amount -= share;
        remaining -= share;
    }

    Ok(discount)
}
