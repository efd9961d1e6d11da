//! Session/token orchestrator.
//!
//! Composes the credential store, attempt tracker, session store, refresh
//! ledger, two-factor machine, re-auth ledger, and OAuth components into the
//! login, refresh, logout, two-factor, and callback flows.
//!
//! Every flow that writes more than one store runs inside a single
//! transaction, with the reads that gate decisions inside the same
//! transaction (or pushed into conditional updates) so concurrent requests
//! resolve through row-level atomicity instead of in-process locks. Outbound
//! email is enqueued into the transactional outbox; audit entries are
//! written best-effort after commit.

pub mod types;
pub(crate) mod utils;

use anyhow::Context;
use chrono::Duration;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::attempts::{self, lockout_for, LockoutClass};
use crate::audit::{self, AuditEntry, AuditEvent};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::email;
use crate::error::{AuthError, AuthResult};
use crate::identity::{self, AccountStatus, IdentityRecord};
use crate::oauth::{self, state::OAuthFlow, OAuthProfile};
use crate::reauth::{self, ReauthGrant};
use crate::refresh;
use crate::session::{self, SessionRecord};
use crate::tokens::{self, AccessClaims};
use crate::twofactor::{self, otp, recovery, totp, FactorKind};
use crate::verification::{self, TokenPurpose};

use types::{ClientInfo, EnrollmentStarted, IssuedTokens, LoginOutcome, OAuthOutcome};
use utils::{hash_token, normalize_email};

/// The engine facade. Cheap to clone; all state lives in the pool.
#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    config: EngineConfig,
    clock: Clock,
}

impl AuthService {
    #[must_use]
    pub fn new(pool: PgPool, config: EngineConfig, clock: Clock) -> Self {
        Self {
            pool,
            config,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---------------------------------------------------------------- login

    /// Password login. Lockout is checked before the password; unknown email
    /// and wrong password are indistinguishable to the caller.
    #[instrument(skip(self, password, client))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device_id: Option<String>,
        client: &ClientInfo,
    ) -> AuthResult<LoginOutcome> {
        let email = normalize_email(email);
        self.gate_lockout(&email).await?;

        let Some(identity) = identity::storage::lookup_by_email(&self.pool, &email).await? else {
            self.note_login_failure(&email, client, "unknown_email").await?;
            return Err(AuthError::InvalidCredentials);
        };

        let password_ok = identity
            .password_hash
            .as_deref()
            .is_some_and(|hash| identity::verify_password(password, hash));
        if !password_ok {
            self.note_login_failure(&email, client, "wrong_password").await?;
            return Err(AuthError::InvalidCredentials);
        }

        gate_account(&identity)?;
        self.complete_login(&identity, device_id, client, AuditEvent::LoginSuccess)
            .await
    }

    /// Second half of a two-factor login: check the code (or a recovery
    /// code) and issue tokens. Failures count against the attempt tracker.
    #[instrument(skip(self, code, client))]
    pub async fn verify_two_factor(
        &self,
        identity_id: Uuid,
        code: &str,
        device_id: Option<String>,
        client: &ClientInfo,
    ) -> AuthResult<IssuedTokens> {
        let identity = identity::storage::lookup_by_id(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        self.gate_lockout(&identity.email).await?;
        gate_account(&identity)?;

        let config = twofactor::storage::get_config(&self.pool, identity.id).await?;
        let Some(config) = config.filter(|config| config.enabled) else {
            return Err(AuthError::Unauthorized);
        };

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin 2fa transaction")?;

        let mut valid = match config.factor_type {
            Some(FactorKind::Totp) => config.factor_data.as_deref().is_some_and(|secret| {
                totp::verify(
                    secret,
                    code.trim(),
                    u64::try_from(now.timestamp()).unwrap_or(0),
                )
            }),
            Some(FactorKind::EmailOtp) => {
                match otp::verify_challenge(
                    &mut tx,
                    identity.id,
                    code,
                    now,
                    self.config.otp_max_attempts(),
                )
                .await?
                {
                    otp::ChallengeOutcome::Valid => true,
                    otp::ChallengeOutcome::Locked => {
                        attempts::storage::record_failure(
                            &mut tx,
                            &identity.email,
                            client.ip.as_deref(),
                            now,
                            self.config.escalation_table(),
                        )
                        .await?;
                        tx.commit().await.context("commit locked challenge")?;
                        self.audit_two_factor_failure(&identity, client, "challenge_locked")
                            .await;
                        return Err(AuthError::OtpLocked);
                    }
                    otp::ChallengeOutcome::Invalid | otp::ChallengeOutcome::Missing => false,
                }
            }
            None => false,
        };

        let mut used_recovery = false;
        if !valid && !code.trim().is_empty() {
            if let Some(normalized) = recovery::normalize_code(code) {
                valid = twofactor::storage::consume_recovery_code(
                    &mut tx,
                    identity.id,
                    &hash_token(&normalized),
                    now,
                )
                .await?;
                used_recovery = valid;
            }
        }

        if !valid {
            attempts::storage::record_failure(
                &mut tx,
                &identity.email,
                client.ip.as_deref(),
                now,
                self.config.escalation_table(),
            )
            .await?;
            tx.commit().await.context("commit 2fa failure")?;
            self.audit_two_factor_failure(&identity, client, "wrong_code")
                .await;
            return Err(AuthError::InvalidTwoFactorCode);
        }

        let device_id = device_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let issued = self
            .issue_session_tokens(&mut tx, &identity, &device_id, client)
            .await?;
        tx.commit().await.context("commit 2fa login")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::LoginSuccess)
                .actor(identity.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({
                    "two_factor": true,
                    "recovery_code_used": used_recovery,
                    "device_class": client.device_class(),
                })),
            now,
        )
        .await;

        Ok(issued)
    }

    /// Shared tail of every login path: status is already gated, credentials
    /// (or the upstream provider) already vouched for the identity.
    async fn complete_login(
        &self,
        identity: &IdentityRecord,
        device_id: Option<String>,
        client: &ClientInfo,
        event: AuditEvent,
    ) -> AuthResult<LoginOutcome> {
        let now = self.clock.now();
        let two_factor = twofactor::storage::get_config(&self.pool, identity.id).await?;
        if let Some(config) = two_factor.filter(|config| config.enabled) {
            if config.factor_type == Some(FactorKind::EmailOtp) {
                let mut tx = self.pool.begin().await.context("begin otp transaction")?;
                let code = otp::create_challenge(
                    &mut tx,
                    identity.id,
                    now,
                    self.config.otp_ttl_seconds(),
                )
                .await?;
                email::enqueue(
                    &mut tx,
                    &identity.email,
                    email::TEMPLATE_TWO_FACTOR_OTP,
                    &json!({
                        "code": code,
                        "expiry_minutes": self.config.otp_ttl_seconds() / 60,
                        "ip": client.ip,
                    }),
                    now,
                )
                .await?;
                tx.commit().await.context("commit otp challenge")?;
            }
            // No token material leaves here; the caller must come back
            // through verify_two_factor.
            return Ok(LoginOutcome::TwoFactorRequired {
                identity_id: identity.id,
            });
        }

        let device_id = device_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut tx = self.pool.begin().await.context("begin login transaction")?;
        let issued = self
            .issue_session_tokens(&mut tx, identity, &device_id, client)
            .await?;
        tx.commit().await.context("commit login transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(event)
                .actor(identity.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({
                    "two_factor": false,
                    "device_class": client.device_class(),
                })),
            now,
        )
        .await;

        Ok(LoginOutcome::LoggedIn(Box::new(issued)))
    }

    /// Session + refresh token + attempt reset + login alert, all inside the
    /// caller's transaction. The access token is signed last; signing has no
    /// store side effects.
    async fn issue_session_tokens(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        identity: &IdentityRecord,
        device_id: &str,
        client: &ClientInfo,
    ) -> AuthResult<IssuedTokens> {
        let now = self.clock.now();
        let session_expires = now + Duration::seconds(self.config.session_ttl_seconds());
        let session_id = session::storage::upsert(
            tx,
            identity.id,
            device_id,
            client.ip.as_deref(),
            client.user_agent.as_deref(),
            now,
            session_expires,
        )
        .await?;

        let refresh_expires = now + Duration::seconds(self.config.refresh_token_ttl_seconds());
        let refresh_token = refresh::issue(tx, session_id, now, refresh_expires).await?;

        attempts::storage::reset(tx, &identity.email).await?;

        email::enqueue(
            tx,
            &identity.email,
            email::TEMPLATE_LOGIN_ALERT,
            &json!({
                "ip": client.ip,
                "device_class": client.device_class(),
                "user_agent": client.user_agent,
            }),
            now,
        )
        .await?;

        let access_token = tokens::mint(&self.config, identity, session_id, now.timestamp())?;
        Ok(IssuedTokens {
            access_token,
            refresh_token,
            access_expires_at: now + Duration::seconds(self.config.access_token_ttl_seconds()),
            refresh_expires_at: refresh_expires,
            identity_id: identity.id,
            session_id,
            device_id: device_id.to_string(),
            email: identity.email.clone(),
            permissions: identity.permissions.clone(),
        })
    }

    // -------------------------------------------------------------- refresh

    /// Exchange a live refresh token for a fresh access/refresh pair. The
    /// presented token is revoked first (single-use); a replay of an already
    /// rotated token fails and is audited.
    #[instrument(skip(self, refresh_token, client))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> AuthResult<IssuedTokens> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin refresh transaction")?;

        let rotated = match refresh::rotate(&mut tx, refresh_token, now).await? {
            Ok(rotated) => rotated,
            Err(failure) => {
                tx.commit().await.context("commit refresh failure")?;
                if failure.is_replay() {
                    warn!("refresh token replay detected");
                    audit::record(
                        &self.pool,
                        AuditEntry::new(AuditEvent::RefreshReplayed)
                            .client(client.ip.as_deref(), client.user_agent.as_deref()),
                        now,
                    )
                    .await;
                }
                return Err(AuthError::TokenExpiredOrRevoked);
            }
        };

        if !rotated.session_live(now) {
            tx.commit().await.context("commit refresh on dead session")?;
            return Err(AuthError::TokenExpiredOrRevoked);
        }

        let refresh_expires = now + Duration::seconds(self.config.refresh_token_ttl_seconds());
        let new_refresh = refresh::issue(&mut tx, rotated.session_id, now, refresh_expires).await?;
        tx.commit().await.context("commit refresh transaction")?;

        let identity = identity::storage::lookup_by_id(&self.pool, rotated.identity_id)
            .await?
            .ok_or(AuthError::TokenExpiredOrRevoked)?;
        gate_account(&identity)?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::RefreshRotated)
                .actor(identity.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref()),
            now,
        )
        .await;

        let session = session::storage::find_by_id(&self.pool, rotated.session_id).await?;
        let device_id = session.map(|s| s.device_id).unwrap_or_default();
        let access_token = tokens::mint(&self.config, &identity, rotated.session_id, now.timestamp())?;
        Ok(IssuedTokens {
            access_token,
            refresh_token: new_refresh,
            access_expires_at: now + Duration::seconds(self.config.access_token_ttl_seconds()),
            refresh_expires_at: refresh_expires,
            identity_id: identity.id,
            session_id: rotated.session_id,
            device_id,
            email: identity.email.clone(),
            permissions: identity.permissions.clone(),
        })
    }

    // -------------------------------------------------------------- logout

    /// Log out one session: revoke its refresh tokens and deactivate it.
    /// Idempotent; an unknown session is a no-op.
    #[instrument(skip(self, client))]
    pub async fn logout_session(&self, session_id: Uuid, client: &ClientInfo) -> AuthResult<()> {
        let Some(session) = session::storage::find_by_id(&self.pool, session_id).await? else {
            return Ok(());
        };
        self.logout_one(&session, client).await
    }

    /// Log out whatever session the identity holds on a device. Scoped to
    /// the identity so a device id alone cannot end someone else's session.
    #[instrument(skip(self, client))]
    pub async fn logout_device(
        &self,
        identity_id: Uuid,
        device_id: &str,
        client: &ClientInfo,
    ) -> AuthResult<()> {
        let session = session::storage::find_by_device(&self.pool, identity_id, device_id).await?;
        let Some(session) = session else {
            return Ok(());
        };
        self.logout_one(&session, client).await
    }

    async fn logout_one(&self, session: &SessionRecord, client: &ClientInfo) -> AuthResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin logout transaction")?;
        refresh::storage::revoke_for_session(&mut tx, session.id).await?;
        session::storage::deactivate(&mut tx, session.id, now).await?;
        tx.commit().await.context("commit logout transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::LogoutSession)
                .actor(session.identity_id)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({"device_id": session.device_id})),
            now,
        )
        .await;
        Ok(())
    }

    /// Log out every device. When `keep_session` names the caller's own
    /// session, that one (and its live refresh token) survives.
    #[instrument(skip(self, client))]
    pub async fn logout_all(
        &self,
        identity_id: Uuid,
        keep_session: Option<Uuid>,
        client: &ClientInfo,
    ) -> AuthResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin logout-all transaction")?;
        let revoked = refresh::storage::revoke_for_identity(&mut tx, identity_id, keep_session).await?;
        let deactivated =
            session::storage::deactivate_all(&mut tx, identity_id, keep_session, now).await?;
        tx.commit().await.context("commit logout-all transaction")?;

        info!(%identity_id, revoked, deactivated, "logout-all completed");
        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::LogoutAll)
                .actor(identity_id)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({"kept_session": keep_session})),
            now,
        )
        .await;
        Ok(())
    }

    // -------------------------------------------- registration / verification

    /// Create a pending identity with hashed credentials, a disabled
    /// two-factor row, and an emailed verification link, atomically.
    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> AuthResult<Uuid> {
        let email = normalize_email(email);
        let password_hash = identity::hash_password(password)?;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await.context("begin register transaction")?;
        let identity_id = match identity::storage::insert_identity(
            &mut tx,
            &email,
            Some(&password_hash),
            AccountStatus::PendingVerification,
            now,
        )
        .await?
        {
            identity::storage::InsertIdentityOutcome::Created(id) => id,
            identity::storage::InsertIdentityOutcome::Conflict => {
                return Err(AuthError::Conflict("email already registered"));
            }
        };

        twofactor::storage::insert_config(&mut tx, identity_id).await?;
        let token = verification::issue(
            &mut tx,
            identity_id,
            TokenPurpose::VerifyEmail,
            now,
            self.config.verification_ttl_seconds(),
        )
        .await?;
        email::enqueue(
            &mut tx,
            &email,
            email::TEMPLATE_VERIFY_EMAIL,
            &json!({"token": token}),
            now,
        )
        .await?;
        tx.commit().await.context("commit register transaction")?;

        info!(%identity_id, "identity registered");
        Ok(identity_id)
    }

    /// Consume an emailed verification token and activate the identity.
    #[instrument(skip(self, token))]
    pub async fn verify_email(&self, token: &str) -> AuthResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin verify transaction")?;
        let identity_id = verification::consume(&mut tx, token, TokenPurpose::VerifyEmail, now)
            .await?
            .ok_or(AuthError::TokenExpiredOrRevoked)?;
        identity::storage::activate(&mut tx, identity_id, now).await?;
        tx.commit().await.context("commit verify transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::EmailVerified).actor(identity_id),
            now,
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------ passwords

    /// Start a password reset. Deliberately opaque: succeeds whether or not
    /// the email exists, to avoid account probing.
    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let Some(identity) = identity::storage::lookup_by_email(&self.pool, &email).await? else {
            return Ok(());
        };

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin reset transaction")?;
        let token = verification::issue(
            &mut tx,
            identity.id,
            TokenPurpose::PasswordReset,
            now,
            self.config.verification_ttl_seconds(),
        )
        .await?;
        email::enqueue(
            &mut tx,
            &identity.email,
            email::TEMPLATE_PASSWORD_RESET,
            &json!({"token": token}),
            now,
        )
        .await?;
        tx.commit().await.context("commit reset transaction")?;
        Ok(())
    }

    /// Complete a password reset from an emailed token. Rotates the identity
    /// secret and logs out every device.
    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin reset transaction")?;
        let identity_id = verification::consume(&mut tx, token, TokenPurpose::PasswordReset, now)
            .await?
            .ok_or(AuthError::TokenExpiredOrRevoked)?;

        let identity = identity::storage::lookup_by_id(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::TokenExpiredOrRevoked)?;

        self.apply_password_change(&mut tx, &identity, new_password, None)
            .await?;
        tx.commit().await.context("commit reset transaction")?;

        self.audit_password_change(&identity, &ClientInfo::default())
            .await;
        Ok(())
    }

    /// Change the password of a logged-in identity. Requires a live step-up
    /// token; the caller's session may be preserved, everything else dies.
    #[instrument(skip(self, reauth_token, new_password, client))]
    pub async fn change_password(
        &self,
        identity_id: Uuid,
        reauth_token: &str,
        new_password: &str,
        keep_session: Option<Uuid>,
        client: &ClientInfo,
    ) -> AuthResult<()> {
        let identity = identity::storage::lookup_by_id(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin password transaction")?;
        reauth::consume(&mut tx, identity_id, reauth_token, now).await?;
        self.apply_password_change(&mut tx, &identity, new_password, keep_session)
            .await?;
        tx.commit().await.context("commit password transaction")?;

        self.audit_password_change(&identity, client).await;
        Ok(())
    }

    /// Hash swap + identity-secret rotation + logout-all + notice email,
    /// inside the caller's transaction. Rotating the secret kills every
    /// outstanding access token the moment the transaction commits.
    async fn apply_password_change(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        identity: &IdentityRecord,
        new_password: &str,
        keep_session: Option<Uuid>,
    ) -> AuthResult<()> {
        let now = self.clock.now();
        let password_hash = identity::hash_password(new_password)?;
        identity::storage::update_password_hash(tx, identity.id, &password_hash, now).await?;
        refresh::storage::revoke_for_identity(tx, identity.id, keep_session).await?;
        session::storage::deactivate_all(tx, identity.id, keep_session, now).await?;
        email::enqueue(
            tx,
            &identity.email,
            email::TEMPLATE_PASSWORD_CHANGED,
            &json!({"changed_at": now.to_rfc3339()}),
            now,
        )
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------- step-up

    /// Prove a fresh password re-entry and get a short-lived step-up token.
    /// Issuing invalidates every previously issued token for this identity.
    #[instrument(skip(self, password, client))]
    pub async fn reauthenticate(
        &self,
        identity_id: Uuid,
        password: &str,
        client: &ClientInfo,
    ) -> AuthResult<ReauthGrant> {
        let identity = identity::storage::lookup_by_id(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        let password_ok = identity
            .password_hash
            .as_deref()
            .is_some_and(|hash| identity::verify_password(password, hash));
        if !password_ok {
            return Err(AuthError::InvalidCredentials);
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin reauth transaction")?;
        let grant = reauth::issue(&mut tx, identity_id, now, self.config.reauth_ttl_seconds()).await?;
        tx.commit().await.context("commit reauth transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::ReauthIssued)
                .actor(identity_id)
                .client(client.ip.as_deref(), client.user_agent.as_deref()),
            now,
        )
        .await;
        Ok(grant)
    }

    /// Validate and consume a step-up token (consume-once across the whole
    /// ledger for this identity).
    #[instrument(skip(self, token))]
    pub async fn consume_reauth(&self, identity_id: Uuid, token: &str) -> AuthResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin consume transaction")?;
        reauth::consume(&mut tx, identity_id, token, now).await?;
        tx.commit().await.context("commit consume transaction")?;
        Ok(())
    }

    // ----------------------------------------------------------- two-factor

    /// Begin enrollment for a factor. TOTP hands back a provisioning URL;
    /// email sends its first code immediately. State: PENDING_ENABLE.
    #[instrument(skip(self, client))]
    pub async fn enable_two_factor(
        &self,
        identity_id: Uuid,
        factor: FactorKind,
        client: &ClientInfo,
    ) -> AuthResult<EnrollmentStarted> {
        let identity = identity::storage::lookup_by_id(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        let config = twofactor::storage::get_config(&self.pool, identity_id).await?;
        if config.is_some_and(|config| config.enabled) {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin enroll transaction")?;
        twofactor::storage::insert_config(&mut tx, identity_id).await?;

        let provisioning_url = match factor {
            FactorKind::Totp => {
                let secret = totp::generate_secret()?;
                let url =
                    totp::provisioning_url(&secret, self.config.totp_issuer(), &identity.email)?;
                twofactor::storage::set_pending(&mut tx, identity_id, factor, Some(&secret), now)
                    .await?;
                Some(url)
            }
            FactorKind::EmailOtp => {
                twofactor::storage::set_pending(&mut tx, identity_id, factor, None, now).await?;
                let code =
                    otp::create_challenge(&mut tx, identity_id, now, self.config.otp_ttl_seconds())
                        .await?;
                email::enqueue(
                    &mut tx,
                    &identity.email,
                    email::TEMPLATE_TWO_FACTOR_OTP,
                    &json!({
                        "code": code,
                        "expiry_minutes": self.config.otp_ttl_seconds() / 60,
                        "ip": client.ip,
                    }),
                    now,
                )
                .await?;
                None
            }
        };
        tx.commit().await.context("commit enroll transaction")?;

        Ok(EnrollmentStarted {
            factor,
            provisioning_url,
        })
    }

    /// Confirm a staged enrollment with a first code. Success flips the
    /// machine to ENABLED and returns a fresh recovery-code batch; a wrong
    /// code leaves the configuration untouched.
    #[instrument(skip(self, code, client))]
    pub async fn confirm_two_factor(
        &self,
        identity_id: Uuid,
        code: &str,
        client: &ClientInfo,
    ) -> AuthResult<Vec<String>> {
        let config = twofactor::storage::get_config(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if config.enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }
        let Some(factor) = config.factor_type else {
            return Err(AuthError::Unauthorized);
        };

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin confirm transaction")?;
        let valid = match factor {
            FactorKind::Totp => config.factor_data.as_deref().is_some_and(|secret| {
                totp::verify(
                    secret,
                    code.trim(),
                    u64::try_from(now.timestamp()).unwrap_or(0),
                )
            }),
            FactorKind::EmailOtp => {
                match otp::verify_challenge(
                    &mut tx,
                    identity_id,
                    code,
                    now,
                    self.config.otp_max_attempts(),
                )
                .await?
                {
                    otp::ChallengeOutcome::Valid => true,
                    otp::ChallengeOutcome::Locked => {
                        tx.commit().await.context("commit locked challenge")?;
                        return Err(AuthError::OtpLocked);
                    }
                    otp::ChallengeOutcome::Invalid | otp::ChallengeOutcome::Missing => false,
                }
            }
        };

        if !valid {
            tx.commit().await.context("commit failed confirm")?;
            return Err(AuthError::InvalidTwoFactorCode);
        }

        twofactor::storage::set_enabled(&mut tx, identity_id, now).await?;
        let codes = self.store_recovery_codes(&mut tx, identity_id).await?;
        tx.commit().await.context("commit confirm transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::MfaEnabled)
                .actor(identity_id)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({"factor": factor.as_str()})),
            now,
        )
        .await;
        Ok(codes)
    }

    /// Turn the factor off entirely.
    #[instrument(skip(self, client))]
    pub async fn disable_two_factor(
        &self,
        identity_id: Uuid,
        client: &ClientInfo,
    ) -> AuthResult<()> {
        let config = twofactor::storage::get_config(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !config.enabled {
            return Err(AuthError::Conflict("two-factor authentication is not enabled"));
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin disable transaction")?;
        twofactor::storage::clear(&mut tx, identity_id, now).await?;
        tx.commit().await.context("commit disable transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::MfaDisabled)
                .actor(identity_id)
                .client(client.ip.as_deref(), client.user_agent.as_deref()),
            now,
        )
        .await;
        Ok(())
    }

    /// Replace the recovery-code batch (e.g. after codes ran low). Requires
    /// an enabled factor.
    #[instrument(skip(self, client))]
    pub async fn regenerate_recovery_codes(
        &self,
        identity_id: Uuid,
        client: &ClientInfo,
    ) -> AuthResult<Vec<String>> {
        let config = twofactor::storage::get_config(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !config.enabled {
            return Err(AuthError::Conflict("two-factor authentication is not enabled"));
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin recovery transaction")?;
        let codes = self.store_recovery_codes(&mut tx, identity_id).await?;
        tx.commit().await.context("commit recovery transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::RecoveryCodesRegenerated)
                .actor(identity_id)
                .client(client.ip.as_deref(), client.user_agent.as_deref()),
            now,
        )
        .await;
        Ok(codes)
    }

    async fn store_recovery_codes(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        identity_id: Uuid,
    ) -> AuthResult<Vec<String>> {
        let codes = recovery::generate_batch(self.config.recovery_code_batch())?;
        let hashes: Vec<Vec<u8>> = codes.iter().map(|code| hash_token(code)).collect();
        twofactor::storage::replace_recovery_codes(tx, identity_id, &hashes, self.clock.now())
            .await?;
        Ok(codes)
    }

    // ---------------------------------------------------------------- oauth

    /// Mint the signed state for an authorize redirect. Link flows must name
    /// the linking identity.
    pub fn oauth_state(&self, flow: OAuthFlow, user_id: Option<Uuid>) -> AuthResult<String> {
        if flow == OAuthFlow::Link && user_id.is_none() {
            return Err(AuthError::Unauthorized);
        }
        oauth::state::sign(&self.config, &self.clock, flow, user_id)
    }

    /// Handle the provider callback: verify the state, then either log the
    /// profile in (creating identity and link idempotently) or link the
    /// provider identity to the stated account. A login state can never
    /// drive a link and vice versa.
    #[instrument(skip(self, state, profile, client))]
    pub async fn oauth_callback(
        &self,
        state: &str,
        profile: &OAuthProfile,
        device_id: Option<String>,
        client: &ClientInfo,
    ) -> AuthResult<OAuthOutcome> {
        let claims = oauth::state::verify(&self.config, state)?;
        match claims.flow {
            OAuthFlow::Login => self
                .oauth_login(profile, device_id, client)
                .await
                .map(OAuthOutcome::Login),
            OAuthFlow::Link => {
                let user_id = claims.user_id.ok_or(AuthError::InvalidState)?;
                self.oauth_link(user_id, profile, client).await
            }
        }
    }

    async fn oauth_login(
        &self,
        profile: &OAuthProfile,
        device_id: Option<String>,
        client: &ClientInfo,
    ) -> AuthResult<LoginOutcome> {
        let email = normalize_email(&profile.email);
        let now = self.clock.now();

        let mut tx = self.pool.begin().await.context("begin oauth transaction")?;
        let identity_id =
            match oauth::storage::find_link(&mut tx, &profile.provider, &profile.provider_id)
                .await?
            {
                Some(link) => link.identity_id,
                None => {
                    if let Some(existing) =
                        identity::storage::lookup_by_email(&self.pool, &email).await?
                    {
                        oauth::storage::insert_link(
                            &mut tx,
                            existing.id,
                            &profile.provider,
                            &profile.provider_id,
                            now,
                        )
                        .await?;
                        existing.id
                    } else {
                        // First sight of this provider identity: OAuth-only
                        // account, active immediately (the provider vouched
                        // for the email), no password hash.
                        match identity::storage::insert_identity(
                            &mut tx,
                            &email,
                            None,
                            AccountStatus::Active,
                            now,
                        )
                        .await?
                        {
                            identity::storage::InsertIdentityOutcome::Created(id) => {
                                twofactor::storage::insert_config(&mut tx, id).await?;
                                oauth::storage::insert_link(
                                    &mut tx,
                                    id,
                                    &profile.provider,
                                    &profile.provider_id,
                                    now,
                                )
                                .await?;
                                id
                            }
                            identity::storage::InsertIdentityOutcome::Conflict => {
                                return Err(AuthError::Conflict("email already registered"));
                            }
                        }
                    }
                }
            };
        tx.commit().await.context("commit oauth transaction")?;

        let identity = identity::storage::lookup_by_id(&self.pool, identity_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        gate_account(&identity)?;
        self.complete_login(&identity, device_id, client, AuditEvent::OauthLogin)
            .await
    }

    async fn oauth_link(
        &self,
        user_id: Uuid,
        profile: &OAuthProfile,
        client: &ClientInfo,
    ) -> AuthResult<OAuthOutcome> {
        let identity = identity::storage::lookup_by_id(&self.pool, user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin link transaction")?;
        if let Some(link) =
            oauth::storage::find_link(&mut tx, &profile.provider, &profile.provider_id).await?
        {
            tx.commit().await.context("commit link noop")?;
            if link.identity_id != identity.id {
                return Err(AuthError::Conflict(
                    "provider identity already linked to another account",
                ));
            }
            // Second link of the same pair is a no-op.
            return Ok(OAuthOutcome::Linked {
                identity_id: identity.id,
            });
        }

        oauth::storage::insert_link(
            &mut tx,
            identity.id,
            &profile.provider,
            &profile.provider_id,
            now,
        )
        .await?;
        tx.commit().await.context("commit link transaction")?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::OauthLinked)
                .actor(identity.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({"provider": profile.provider})),
            now,
        )
        .await;
        Ok(OAuthOutcome::Linked {
            identity_id: identity.id,
        })
    }

    // ------------------------------------------------------------- reads

    /// Verify a presented access token against the identity's current
    /// signing secret.
    pub async fn verify_access(&self, token: &str) -> AuthResult<AccessClaims> {
        let subject = tokens::extract_subject(token).ok_or(AuthError::Unauthorized)?;
        let secret = identity::storage::fetch_secret(&self.pool, subject)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        tokens::verify(&self.config, token, &secret)
    }

    /// All sessions for an identity, for device-management surfaces.
    pub async fn sessions(&self, identity_id: Uuid) -> AuthResult<Vec<SessionRecord>> {
        session::storage::list_for_identity(&self.pool, identity_id)
            .await
            .map_err(AuthError::from)
    }

    /// Providers linked to an identity.
    pub async fn linked_providers(&self, identity_id: Uuid) -> AuthResult<Vec<String>> {
        oauth::storage::list_for_identity(&self.pool, identity_id)
            .await
            .map_err(AuthError::from)
    }

    // ------------------------------------------------------------- internal

    /// Reject before the password is even looked at while a lockout window
    /// is open.
    async fn gate_lockout(&self, email: &str) -> AuthResult<()> {
        let Some(record) = attempts::storage::fetch(&self.pool, email).await? else {
            return Ok(());
        };
        if let Some(blocked_until) = record.blocked_until {
            if blocked_until > self.clock.now() {
                let class = lockout_for(
                    u32::try_from(record.attempts).unwrap_or(0),
                    self.config.escalation_table(),
                )
                .unwrap_or(LockoutClass::FiveMinutes);
                return Err(AuthError::TooManyAttempts(class));
            }
        }
        Ok(())
    }

    /// Count a credential failure and audit it. The caller still fails with
    /// the anti-enumeration error; only logs and audit keep the reason.
    async fn note_login_failure(
        &self,
        email: &str,
        client: &ClientInfo,
        reason: &str,
    ) -> AuthResult<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.context("begin failure transaction")?;
        let (count, class) = attempts::storage::record_failure(
            &mut tx,
            email,
            client.ip.as_deref(),
            now,
            self.config.escalation_table(),
        )
        .await?;
        tx.commit().await.context("commit failure transaction")?;

        warn!(email, reason, count, "login failed");
        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::LoginFailed)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({
                    "email": email,
                    "reason": reason,
                    "failure_count": count,
                    "lockout": class.map(LockoutClass::as_str),
                })),
            now,
        )
        .await;
        Ok(())
    }

    async fn audit_two_factor_failure(
        &self,
        identity: &IdentityRecord,
        client: &ClientInfo,
        reason: &str,
    ) {
        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::TwoFactorFailed)
                .actor(identity.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref())
                .metadata(json!({"reason": reason})),
            self.clock.now(),
        )
        .await;
    }

    async fn audit_password_change(&self, identity: &IdentityRecord, client: &ClientInfo) {
        audit::record(
            &self.pool,
            AuditEntry::new(AuditEvent::PasswordChanged)
                .actor(identity.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref()),
            self.clock.now(),
        )
        .await;
    }
}

/// Only active identities authenticate; everything else carries its status
/// as the sub-reason.
fn gate_account(identity: &IdentityRecord) -> AuthResult<()> {
    match identity.status {
        AccountStatus::Active => Ok(()),
        status => Err(AuthError::AccountNotUsable(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(status: AccountStatus) -> IdentityRecord {
        IdentityRecord {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            password_hash: None,
            secret: "secret".to_string(),
            status,
            permissions: vec![],
        }
    }

    #[test]
    fn gate_account_accepts_only_active() {
        assert!(gate_account(&identity(AccountStatus::Active)).is_ok());
        for status in [
            AccountStatus::PendingVerification,
            AccountStatus::Suspended,
            AccountStatus::Inactive,
        ] {
            match gate_account(&identity(status)) {
                Err(AuthError::AccountNotUsable(reason)) => assert_eq!(reason, status),
                other => panic!("expected AccountNotUsable, got {other:?}"),
            }
        }
    }
}
