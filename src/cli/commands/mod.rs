pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_STATE_SECRET: &str = "state-secret";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_ACCESS_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TTL: &str = "refresh-token-ttl";
pub const ARG_OUTBOX_POLL: &str = "outbox-poll";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new(env!("CARGO_PKG_NAME"))
        .about("Authentication and session security engine")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("WARDEN_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .long(ARG_DSN)
                .help("PostgreSQL connection string")
                .env("WARDEN_DATABASE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("Server component of the access-token signing key")
                .env("WARDEN_TOKEN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_STATE_SECRET)
                .long(ARG_STATE_SECRET)
                .help("Signing key for OAuth state tokens")
                .env("WARDEN_STATE_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown in authenticator apps")
                .env("WARDEN_TOTP_ISSUER")
                .default_value("Warden"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .env("WARDEN_ACCESS_TOKEN_TTL")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token lifetime in seconds")
                .env("WARDEN_REFRESH_TOKEN_TTL")
                .default_value("172800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_POLL)
                .long(ARG_OUTBOX_POLL)
                .help("Email outbox poll interval in seconds")
                .env("WARDEN_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        );

    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "warden",
            "--dsn",
            "postgres://localhost/warden",
            "--token-secret",
            "t",
            "--state-secret",
            "s",
        ]
    }

    #[test]
    fn defaults_apply() {
        let matches = new().try_get_matches_from(base_args()).unwrap();
        assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8080));
        assert_eq!(
            matches.get_one::<String>(ARG_TOTP_ISSUER).map(String::as_str),
            Some("Warden")
        );
        assert_eq!(matches.get_one::<i64>(ARG_ACCESS_TTL).copied(), Some(1800));
    }

    #[test]
    fn dsn_is_required() {
        let result = new().try_get_matches_from(vec![
            "warden",
            "--token-secret",
            "t",
            "--state-secret",
            "s",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn env_supplies_required_args() {
        temp_env::with_vars(
            [
                ("WARDEN_DATABASE_URL", Some("postgres://localhost/warden")),
                ("WARDEN_TOKEN_SECRET", Some("t")),
                ("WARDEN_STATE_SECRET", Some("s")),
                ("WARDEN_PORT", Some("9090")),
            ],
            || {
                let matches = new().try_get_matches_from(vec!["warden"]).unwrap();
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9090));
            },
        );
    }
}
