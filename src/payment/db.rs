//! PostgreSQL payment store (`payments_tb`, `payment_channels_tb`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::PaymentStore;
use super::error::PaymentError;
use super::types::{
    InteractionMode, Payment, PaymentChannel, PaymentIntent, PaymentStatus, ProviderType,
};
use crate::core_types::{ChannelId, Currency, OrderId, PaymentId};
use crate::settlement::state::SettlePhase;

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn bad(column: &str, value: impl std::fmt::Display) -> PaymentError {
        PaymentError::DatabaseError(format!("bad {column}: {value}"))
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment, PaymentError> {
        let provider_type: String = row.try_get("provider_type")?;
        let mode: String = row.try_get("interaction_mode")?;
        let status: i16 = row.try_get("status")?;
        let phase: i16 = row.try_get("settle_phase")?;
        let currency: String = row.try_get("currency")?;
        let Json(provider_payload): Json<serde_json::Value> = row.try_get("provider_payload")?;
        Ok(Payment {
            id: row.try_get("id")?,
            payment_no: row.try_get("payment_no")?,
            order_id: row.try_get("order_id")?,
            recharge_id: row.try_get("recharge_id")?,
            user_id: row.try_get("user_id")?,
            channel_id: row.try_get("channel_id")?,
            provider_type: ProviderType::parse(&provider_type)
                .ok_or_else(|| Self::bad("provider_type", &provider_type))?,
            channel_type: row.try_get("channel_type")?,
            interaction_mode: InteractionMode::parse(&mode)
                .ok_or_else(|| Self::bad("interaction_mode", &mode))?,
            amount: row.try_get("amount")?,
            fee: row.try_get("fee")?,
            wallet_amount: row.try_get("wallet_amount")?,
            currency: Currency::new(&currency),
            status: PaymentStatus::from_id(status).ok_or_else(|| Self::bad("status", status))?,
            settle_phase: SettlePhase::from_id(phase).ok_or_else(|| Self::bad("settle_phase", phase))?,
            provider_ref: row.try_get("provider_ref")?,
            provider_payload,
            pay_url: row.try_get("pay_url")?,
            qr_code: row.try_get("qr_code")?,
            expires_at: row.try_get("expires_at")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_channel(row: &PgRow) -> Result<PaymentChannel, PaymentError> {
        let provider_type: String = row.try_get("provider_type")?;
        let modes: Vec<String> = row.try_get("interaction_modes")?;
        let Json(config): Json<serde_json::Value> = row.try_get("config")?;
        Ok(PaymentChannel {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            provider_type: ProviderType::parse(&provider_type)
                .ok_or_else(|| Self::bad("provider_type", &provider_type))?,
            channel_type: row.try_get("channel_type")?,
            interaction_modes: modes
                .iter()
                .map(|m| InteractionMode::parse(m).ok_or_else(|| Self::bad("interaction_mode", m)))
                .collect::<Result<_, _>>()?,
            fee_rate: row.try_get("fee_rate")?,
            active: row.try_get("active")?,
            config,
            sort_order: row.try_get("sort_order")?,
        })
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, p: Payment) -> Result<Payment, PaymentError> {
        let row = sqlx::query(
            r#"
            INSERT INTO payments_tb
                (payment_no, order_id, recharge_id, user_id, channel_id, provider_type,
                 channel_type, interaction_mode, amount, fee, wallet_amount, currency,
                 status, settle_phase, provider_ref, provider_payload, pay_url, qr_code,
                 expires_at, paid_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $21)
            RETURNING *
            "#,
        )
        .bind(&p.payment_no)
        .bind(p.order_id)
        .bind(p.recharge_id)
        .bind(p.user_id)
        .bind(p.channel_id)
        .bind(p.provider_type.as_str())
        .bind(&p.channel_type)
        .bind(p.interaction_mode.as_str())
        .bind(p.amount)
        .bind(p.fee)
        .bind(p.wallet_amount)
        .bind(p.currency.as_str())
        .bind(p.status.id())
        .bind(p.settle_phase.id())
        .bind(&p.provider_ref)
        .bind(Json(&p.provider_payload))
        .bind(&p.pay_url)
        .bind(&p.qr_code)
        .bind(p.expires_at)
        .bind(p.paid_at)
        .bind(p.created_at)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_payment(&row)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, PaymentError> {
        let row = sqlx::query("SELECT * FROM payments_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn get_by_no(&self, payment_no: &str) -> Result<Option<Payment>, PaymentError> {
        let row = sqlx::query("SELECT * FROM payments_tb WHERE payment_no = $1")
            .bind(payment_no)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, PaymentError> {
        let rows = sqlx::query("SELECT * FROM payments_tb WHERE order_id = $1 ORDER BY id")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn set_intent(&self, id: PaymentId, intent: &PaymentIntent) -> Result<(), PaymentError> {
        sqlx::query(
            r#"
            UPDATE payments_tb
            SET pay_url = $1, qr_code = $2, provider_ref = COALESCE($3, provider_ref),
                provider_payload = $4, updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(&intent.pay_url)
        .bind(&intent.qr_code)
        .bind(&intent.provider_ref)
        .bind(Json(&intent.payload))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        phase: SettlePhase,
        provider_ref: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PaymentError> {
        let result = sqlx::query(
            r#"
            UPDATE payments_tb
            SET status = $1, settle_phase = $2, provider_ref = COALESCE($3, provider_ref),
                paid_at = COALESCE($4, paid_at), updated_at = NOW()
            WHERE id = $5 AND status = $6
            "#,
        )
        .bind(to.id())
        .bind(phase.id())
        .bind(provider_ref)
        .bind(paid_at)
        .bind(id)
        .bind(from.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn advance_phase(
        &self,
        id: PaymentId,
        from: SettlePhase,
        to: SettlePhase,
    ) -> Result<bool, PaymentError> {
        let result = sqlx::query(
            "UPDATE payments_tb SET settle_phase = $1, updated_at = NOW() WHERE id = $2 AND settle_phase = $3",
        )
        .bind(to.id())
        .bind(id)
        .bind(from.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_unsettled(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM payments_tb
            WHERE status <> $1 AND settle_phase NOT IN ($2, $3, $4) AND updated_at <= $5
            ORDER BY updated_at
            LIMIT $6
            "#,
        )
        .bind(PaymentStatus::Pending.id())
        .bind(SettlePhase::Done.id())
        .bind(SettlePhase::NeedsRefund.id())
        .bind(SettlePhase::Released.id())
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError> {
        let rows = sqlx::query(
            "SELECT * FROM payments_tb WHERE status = $1 AND expires_at <= $2 ORDER BY expires_at LIMIT $3",
        )
        .bind(PaymentStatus::Pending.id())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn list_channels(&self) -> Result<Vec<PaymentChannel>, PaymentError> {
        let rows = sqlx::query("SELECT * FROM payment_channels_tb ORDER BY sort_order, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_channel).collect()
    }

    async fn upsert_channel(&self, c: PaymentChannel) -> Result<PaymentChannel, PaymentError> {
        let modes: Vec<&str> = c.interaction_modes.iter().map(|m| m.as_str()).collect();
        let row = if c.id == 0 {
            sqlx::query(
                r#"
                INSERT INTO payment_channels_tb
                    (name, provider_type, channel_type, interaction_modes, fee_rate, active, config, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
                "#,
            )
            .bind(&c.name)
            .bind(c.provider_type.as_str())
            .bind(&c.channel_type)
            .bind(&modes)
            .bind(c.fee_rate)
            .bind(c.active)
            .bind(Json(&c.config))
            .bind(c.sort_order)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE payment_channels_tb
                SET name = $1, provider_type = $2, channel_type = $3, interaction_modes = $4,
                    fee_rate = $5, active = $6, config = $7, sort_order = $8
                WHERE id = $9
                RETURNING *
                "#,
            )
            .bind(&c.name)
            .bind(c.provider_type.as_str())
            .bind(&c.channel_type)
            .bind(&modes)
            .bind(c.fee_rate)
            .bind(c.active)
            .bind(Json(&c.config))
            .bind(c.sort_order)
            .bind(c.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PaymentError::ChannelNotFound(c.id))?
        };
        Self::row_to_channel(&row)
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<PaymentChannel>, PaymentError> {
        let row = sqlx::query("SELECT * FROM payment_channels_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_channel).transpose()
    }
}
