//! PostgreSQL wallet store
//!
//! `adjust` runs in one transaction: replay check, conditional balance
//! update, ledger insert. The unique index on `correlation` closes the race
//! between two concurrent first attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::error::WalletError;
use super::types::{
    AdjustOutcome, AdjustRequest, GiftCard, GiftCardStatus, RechargeOrder, RechargeStatus,
    TxKind, WalletAccount, WalletTransaction,
};
use super::WalletStore;
use crate::core_types::{Currency, PaymentId, RechargeId, UserId};

pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_account(row: &PgRow) -> Result<WalletAccount, WalletError> {
        let currency: String = row.try_get("currency")?;
        Ok(WalletAccount {
            user_id: row.try_get("user_id")?,
            balance: row.try_get("balance")?,
            currency: Currency::new(&currency),
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_tx(row: &PgRow) -> Result<WalletTransaction, WalletError> {
        let kind: i16 = row.try_get("kind")?;
        Ok(WalletTransaction {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: TxKind::from_id(kind)
                .ok_or_else(|| WalletError::DatabaseError(format!("bad tx kind {kind}")))?,
            delta: row.try_get("delta")?,
            balance_after: row.try_get("balance_after")?,
            remark: row.try_get("remark")?,
            correlation: row.try_get("correlation")?,
            order_id: row.try_get("order_id")?,
            payment_id: row.try_get("payment_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_recharge(row: &PgRow) -> Result<RechargeOrder, WalletError> {
        let status: i16 = row.try_get("status")?;
        let currency: String = row.try_get("currency")?;
        Ok(RechargeOrder {
            id: row.try_get("id")?,
            recharge_no: row.try_get("recharge_no")?,
            user_id: row.try_get("user_id")?,
            payment_id: row.try_get("payment_id")?,
            channel_id: row.try_get("channel_id")?,
            amount: row.try_get("amount")?,
            fee: row.try_get("fee")?,
            payable_amount: row.try_get("payable_amount")?,
            currency: Currency::new(&currency),
            status: RechargeStatus::from_id(status)
                .ok_or_else(|| WalletError::DatabaseError(format!("bad recharge status {status}")))?,
            created_at: row.try_get("created_at")?,
            paid_at: row.try_get("paid_at")?,
        })
    }

    fn row_to_gift_card(row: &PgRow) -> Result<GiftCard, WalletError> {
        let status: i16 = row.try_get("status")?;
        let currency: String = row.try_get("currency")?;
        Ok(GiftCard {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            amount: row.try_get("amount")?,
            currency: Currency::new(&currency),
            status: GiftCardStatus::from_id(status)
                .ok_or_else(|| WalletError::DatabaseError(format!("bad gift card status {status}")))?,
            redeemed_by: row.try_get("redeemed_by")?,
            redeemed_at: row.try_get("redeemed_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    async fn replay(
        &self,
        req: &AdjustRequest,
        currency: &Currency,
        existing: WalletTransaction,
    ) -> Result<AdjustOutcome, WalletError> {
        if existing.user_id != req.user_id || existing.delta != req.delta {
            return Err(WalletError::CorrelationConflict(req.correlation.clone()));
        }
        debug!(correlation = %req.correlation, "Wallet adjustment already applied");
        Ok(AdjustOutcome {
            account: self.account(req.user_id, currency).await?,
            transaction: existing,
            applied: false,
        })
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn account(&self, user_id: UserId, currency: &Currency) -> Result<WalletAccount, WalletError> {
        sqlx::query(
            "INSERT INTO wallet_accounts_tb (user_id, balance, currency, version) VALUES ($1, 0, $2, 0) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(currency.as_str())
        .execute(&self.pool)
        .await?;
        let row = sqlx::query("SELECT * FROM wallet_accounts_tb WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_account(&row)
    }

    async fn adjust(
        &self,
        req: &AdjustRequest,
        currency: &Currency,
    ) -> Result<AdjustOutcome, WalletError> {
        if let Some(existing) = self.find_transaction(&req.correlation).await? {
            return self.replay(req, currency, existing).await;
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO wallet_accounts_tb (user_id, balance, currency, version) VALUES ($1, 0, $2, 0) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(req.user_id)
        .bind(currency.as_str())
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE wallet_accounts_tb
            SET balance = balance + $2, version = version + 1, updated_at = NOW()
            WHERE user_id = $1 AND balance + $2 >= 0
            RETURNING *
            "#,
        )
        .bind(req.user_id)
        .bind(req.delta)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let available: Decimal =
                sqlx::query_scalar("SELECT balance FROM wallet_accounts_tb WHERE user_id = $1")
                    .bind(req.user_id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(WalletError::InsufficientBalance {
                available,
                requested: -req.delta,
            });
        };
        let account = Self::row_to_account(&row)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO wallet_transactions_tb
                (user_id, kind, delta, balance_after, remark, correlation, order_id, payment_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(req.user_id)
        .bind(req.kind.id())
        .bind(req.delta)
        .bind(account.balance)
        .bind(&req.remark)
        .bind(&req.correlation)
        .bind(req.order_id)
        .bind(req.payment_id)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                // A concurrent attempt with the same correlation won
                tx.rollback().await?;
                let existing = self
                    .find_transaction(&req.correlation)
                    .await?
                    .ok_or_else(|| WalletError::DatabaseError("correlation vanished".into()))?;
                return self.replay(req, currency, existing).await;
            }
            Err(e) => return Err(e.into()),
        };
        let transaction = Self::row_to_tx(&row)?;
        tx.commit().await?;

        Ok(AdjustOutcome {
            account,
            transaction,
            applied: true,
        })
    }

    async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>, WalletError> {
        let rows = sqlx::query(
            "SELECT * FROM wallet_transactions_tb WHERE user_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_tx).collect()
    }

    async fn find_transaction(&self, correlation: &str) -> Result<Option<WalletTransaction>, WalletError> {
        let row = sqlx::query("SELECT * FROM wallet_transactions_tb WHERE correlation = $1")
            .bind(correlation)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_tx).transpose()
    }

    async fn insert_recharge(&self, recharge: RechargeOrder) -> Result<RechargeOrder, WalletError> {
        let row = sqlx::query(
            r#"
            INSERT INTO wallet_recharges_tb
                (recharge_no, user_id, payment_id, channel_id, amount, fee, payable_amount,
                 currency, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&recharge.recharge_no)
        .bind(recharge.user_id)
        .bind(recharge.payment_id)
        .bind(recharge.channel_id)
        .bind(recharge.amount)
        .bind(recharge.fee)
        .bind(recharge.payable_amount)
        .bind(recharge.currency.as_str())
        .bind(recharge.status.id())
        .bind(recharge.created_at)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_recharge(&row)
    }

    async fn get_recharge(&self, id: RechargeId) -> Result<Option<RechargeOrder>, WalletError> {
        let row = sqlx::query("SELECT * FROM wallet_recharges_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_recharge).transpose()
    }

    async fn get_recharge_by_no(&self, recharge_no: &str) -> Result<Option<RechargeOrder>, WalletError> {
        let row = sqlx::query("SELECT * FROM wallet_recharges_tb WHERE recharge_no = $1")
            .bind(recharge_no)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_recharge).transpose()
    }

    async fn attach_recharge_payment(
        &self,
        id: RechargeId,
        payment_id: PaymentId,
    ) -> Result<(), WalletError> {
        sqlx::query("UPDATE wallet_recharges_tb SET payment_id = $1 WHERE id = $2")
            .bind(payment_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transition_recharge(
        &self,
        id: RechargeId,
        from: RechargeStatus,
        to: RechargeStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, WalletError> {
        let result = sqlx::query(
            "UPDATE wallet_recharges_tb SET status = $1, paid_at = COALESCE($2, paid_at) WHERE id = $3 AND status = $4",
        )
        .bind(to.id())
        .bind(paid_at)
        .bind(id)
        .bind(from.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_gift_card(
        &self,
        code: &str,
        amount: Decimal,
        currency: &Currency,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GiftCard, WalletError> {
        let row = sqlx::query(
            "INSERT INTO gift_cards_tb (code, amount, currency, status, expires_at) VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(code)
        .bind(amount)
        .bind(currency.as_str())
        .bind(GiftCardStatus::Unused.id())
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_gift_card(&row)
    }

    async fn get_gift_card(&self, code: &str) -> Result<Option<GiftCard>, WalletError> {
        let row = sqlx::query("SELECT * FROM gift_cards_tb WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_gift_card).transpose()
    }

    async fn mark_gift_card_redeemed(
        &self,
        id: i64,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, WalletError> {
        let result = sqlx::query(
            "UPDATE gift_cards_tb SET status = $1, redeemed_by = $2, redeemed_at = $3 WHERE id = $4 AND status = $5",
        )
        .bind(GiftCardStatus::Redeemed.id())
        .bind(user_id)
        .bind(at)
        .bind(id)
        .bind(GiftCardStatus::Unused.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
