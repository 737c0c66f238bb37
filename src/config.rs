use once_cell::sync::Lazy;
use std::time::Duration;

/// Issuer URL stamped into every access token. Must be set via `ISSUER`.
pub static ISSUER: Lazy<String> =
    Lazy::new(|| std::env::var("ISSUER").expect("ISSUER must be set"));

/// Audience accepted by the token parser. Must be set via `AUDIENCE`.
pub static AUDIENCE: Lazy<String> =
    Lazy::new(|| std::env::var("AUDIENCE").expect("AUDIENCE must be set"));

/// OAuth client id this broker serves. Must be set via `CLIENT_ID`.
pub static CLIENT_ID: Lazy<String> =
    Lazy::new(|| std::env::var("CLIENT_ID").expect("CLIENT_ID must be set"));

/// PEM file holding the signing key. Must be set via `SIGNING_KEY_FILE`.
pub static SIGNING_KEY_FILE: Lazy<String> =
    Lazy::new(|| std::env::var("SIGNING_KEY_FILE").expect("SIGNING_KEY_FILE must be set"));

/// Key id published in the JWKS document. Must be set via `SIGNING_KEY_ID`.
pub static SIGNING_KEY_ID: Lazy<String> =
    Lazy::new(|| std::env::var("SIGNING_KEY_ID").expect("SIGNING_KEY_ID must be set"));

/// Access token lifetime. Defaults to one hour.
pub static ACCESS_TTL: Lazy<Duration> = Lazy::new(|| duration_env("ACCESS_TTL", "1h"));

/// Refresh token lifetime. Defaults to thirty days.
pub static REFRESH_TTL: Lazy<Duration> = Lazy::new(|| duration_env("REFRESH_TTL", "30d"));

/// Space-separated scopes granted to issued tokens.
pub static SCOPES: Lazy<String> =
    Lazy::new(|| std::env::var("SCOPES").unwrap_or_else(|_| "openid profile email".into()));

/// Base64-encoded 32-byte AES-GCM key protecting refresh-token records.
pub static REFRESH_TOKEN_KEY: Lazy<String> =
    Lazy::new(|| std::env::var("REFRESH_TOKEN_KEY").expect("REFRESH_TOKEN_KEY must be set"));

pub static GITHUB_CLIENT_ID: Lazy<String> =
    Lazy::new(|| std::env::var("GITHUB_CLIENT_ID").expect("GITHUB_CLIENT_ID must be set"));

pub static GITHUB_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("GITHUB_CLIENT_SECRET").expect("GITHUB_CLIENT_SECRET must be set"));

pub static GITHUB_DEVICE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_DEVICE_URL")
        .unwrap_or_else(|_| "https://github.com/login/device/code".into())
});

pub static GITHUB_TOKEN_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_TOKEN_URL")
        .unwrap_or_else(|_| "https://github.com/login/oauth/access_token".into())
});

pub static GITHUB_AUTHORIZE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_AUTHORIZE_URL")
        .unwrap_or_else(|_| "https://github.com/login/oauth/authorize".into())
});

pub static GITHUB_USER_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_USER_URL").unwrap_or_else(|_| "https://api.github.com/user".into())
});

pub static GITHUB_EMAILS_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_EMAILS_URL")
        .unwrap_or_else(|_| "https://api.github.com/user/emails".into())
});

pub static GITHUB_API_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_API_URL").unwrap_or_else(|_| "https://api.github.com".into())
});

/// Scopes requested from GitHub during login.
pub static GITHUB_SCOPES: Lazy<String> =
    Lazy::new(|| std::env::var("GITHUB_SCOPES").unwrap_or_else(|_| "read:user user:email".into()));

/// GitHub App id used for installation-scoped repo reads.
pub static GITHUB_APP_ID: Lazy<Option<u64>> =
    Lazy::new(|| std::env::var("GITHUB_APP_ID").ok().and_then(|v| v.parse().ok()));

/// PEM file holding the GitHub App private key.
pub static GITHUB_APP_PRIVATE_KEY_FILE: Lazy<Option<String>> =
    Lazy::new(|| std::env::var("GITHUB_APP_PRIVATE_KEY_FILE").ok());

/// Public base URL of this broker, used for the upstream callback redirect
/// and for deciding whether cookies carry the `Secure` attribute.
pub static PUBLIC_BASE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into())
});

/// Comma-separated list of origins allowed to make credentialed requests.
pub static ALLOWED_ORIGINS: Lazy<Vec<String>> = Lazy::new(|| {
    std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
});

pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".into()));

pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
});

pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
});

fn duration_env(key: &str, default: &str) -> Duration {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    parse_duration(&raw).unwrap_or_else(|| panic!("{key} is not a valid duration: {raw}"))
}

/// Parses `90s`, `15m`, `1h`, `30d`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (value, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = value.parse().ok()?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// True when the public host is a localhost equivalent, in which case issued
/// cookies omit the `Secure` attribute.
pub fn public_host_is_local() -> bool {
    let host = url::Url::parse(&PUBLIC_BASE_URL)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default();
    host == "localhost" || host == "127.0.0.1" || host == "::1" || host.ends_with(".local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_units() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("30d"), Some(Duration::from_secs(2_592_000)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
    }

    #[test]
    fn bad_durations_rejected() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10w"), None);
    }
}
