//! Validated server options carried from the CLI into the runtime.

use secrecy::SecretString;

#[derive(Clone)]
pub struct ServerOptions {
    pub port: u16,
    pub dsn: SecretString,
    pub token_secret: SecretString,
    pub state_secret: SecretString,
    pub totp_issuer: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub outbox_poll_seconds: u64,
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("port", &self.port)
            .field("dsn", &"***")
            .field("token_secret", &"***")
            .field("state_secret", &"***")
            .field("totp_issuer", &self.totp_issuer)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("outbox_poll_seconds", &self.outbox_poll_seconds)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let options = ServerOptions {
            port: 8080,
            dsn: SecretString::from("postgres://user:hunter2@db/warden".to_string()),
            token_secret: SecretString::from("token-secret".to_string()),
            state_secret: SecretString::from("state-secret".to_string()),
            totp_issuer: "Warden".to_string(),
            access_token_ttl_seconds: 1800,
            refresh_token_ttl_seconds: 172_800,
            outbox_poll_seconds: 5,
        };
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("token-secret"));
        assert!(rendered.contains("8080"));
    }
}
