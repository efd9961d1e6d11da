//! Outbound email: transactional outbox plus delivery worker.
//!
//! Flows enqueue rows in `email_outbox` inside their own transaction, so a
//! login that commits always has its alert queued and a login that rolls
//! back never sends anything. A background task polls the table, locks a
//! batch with `FOR UPDATE SKIP LOCKED`, and hands each row to an
//! [`EmailSender`]. Delivery failures are retried with exponential backoff
//! and jitter up to a max attempt count, then marked `failed`; they never
//! affect the flow that queued them.
//!
//! The default sender for dev and tests is [`LogEmailSender`], which logs
//! the payload and reports success.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Template id for the post-login alert email.
pub(crate) const TEMPLATE_LOGIN_ALERT: &str = "login_alert";
/// Template id for a two-factor one-time code.
pub(crate) const TEMPLATE_TWO_FACTOR_OTP: &str = "two_factor_otp";
/// Template id for the address-verification link.
pub(crate) const TEMPLATE_VERIFY_EMAIL: &str = "verify_email";
/// Template id for the password-reset link.
pub(crate) const TEMPLATE_PASSWORD_RESET: &str = "password_reset";
/// Template id for the password-changed notice.
pub(crate) const TEMPLATE_PASSWORD_CHANGED: &str = "password_changed";

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction used by the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email outbox send stub"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OutboxConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl OutboxConfig {
    /// Defaults: 5s poll, 10 messages per batch, 5 attempts, 5s–5m backoff.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue a message inside the caller's transaction.
pub(crate) async fn enqueue(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<()> {
    let payload_text = payload.to_string();
    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json, next_attempt_at, created_at)
        VALUES ($1, $2, $3::jsonb, $4, $4)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to enqueue outbox email")?;
    Ok(())
}

/// Spawn the background task that drains the outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: OutboxConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = process_batch(&pool, sender.as_ref(), &config).await {
                error!("email outbox batch failed: {err}");
            }
            sleep(config.poll_interval).await;
        }
    })
}

async fn process_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &OutboxConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start outbox transaction")?;

    // Locked batch so several workers can run without double-sending.
    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size).unwrap_or(1))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load outbox batch")?;

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let attempts: i32 = row.get("attempts");
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };
        let send_result = sender.send(&message);
        settle_row(&mut tx, id, u32::try_from(attempts).unwrap_or(0), send_result, config).await?;
    }

    tx.commit()
        .await
        .context("failed to commit outbox batch")?;
    Ok(row_count)
}

async fn settle_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
    send_result: Result<()>,
    config: &OutboxConfig,
) -> Result<()> {
    let next_attempt = attempts.saturating_add(1);
    let attempts_i32 = i32::try_from(next_attempt).unwrap_or(i32::MAX);
    match send_result {
        Ok(()) => {
            let query = r"
                UPDATE email_outbox
                SET status = 'sent', attempts = $2, last_error = NULL, sent_at = NOW()
                WHERE id = $1
            ";
            sqlx::query(query)
                .bind(id)
                .bind(attempts_i32)
                .execute(&mut **tx)
                .await
                .context("failed to mark outbox row sent")?;
        }
        Err(err) if next_attempt >= config.max_attempts => {
            let query = r"
                UPDATE email_outbox
                SET status = 'failed', attempts = $2, last_error = $3
                WHERE id = $1
            ";
            sqlx::query(query)
                .bind(id)
                .bind(attempts_i32)
                .bind(err.to_string())
                .execute(&mut **tx)
                .await
                .context("failed to mark outbox row failed")?;
        }
        Err(err) => {
            let delay = backoff_delay(next_attempt, config.backoff_base, config.backoff_max);
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            let query = r"
                UPDATE email_outbox
                SET attempts = $2, last_error = $3,
                    next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
                WHERE id = $1
            ";
            sqlx::query(query)
                .bind(id)
                .bind(attempts_i32)
                .bind(err.to_string())
                .bind(delay_ms)
                .execute(&mut **tx)
                .await
                .context("failed to reschedule outbox row")?;
        }
    }
    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    jitter(delay.min(max))
}

fn jitter(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sender_always_succeeds() {
        let sender = LogEmailSender;
        let message = EmailMessage {
            to_email: "user@example.com".to_string(),
            template: TEMPLATE_LOGIN_ALERT.to_string(),
            payload_json: "{}".to_string(),
        };
        assert!(sender.send(&message).is_ok());
    }

    #[test]
    fn config_clamps_to_sane_minimums() {
        let config = OutboxConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(4);
        let max = Duration::from_secs(60);
        let first = backoff_delay(1, base, max);
        let fifth = backoff_delay(5, base, max);
        // Jitter keeps delays within [half, full] of the raw value.
        assert!(first >= Duration::from_secs(2) && first <= base);
        assert!(fifth >= Duration::from_secs(30) && fifth <= max);
        let huge = backoff_delay(31, base, max);
        assert!(huge <= max);
    }
}
