use std::{env, fmt::Display, str::FromStr};

/// Local fallback for the token signing secret. Never accepted in production.
const LOCAL_SESSION_SECRET: &str = "blog-portal-local-session-secret";

/// AppConfig
///
/// Holds the application's entire configuration state. Loaded once at startup and shared
/// read-only through the application state.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Runtime environment marker. Controls log format and cookie hardening.
    pub env: Env,
    /// Postgres connection string. `None` in local mode selects the in-memory store.
    pub db_url: Option<String>,
    /// HMAC secret used to sign session tokens.
    pub session_secret: String,
    pub session_ttl_minutes: i64,
    /// Argon2 memory cost in KiB.
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub host: String,
    pub port: u16,
}

/// Env
///
/// The runtime context: a developer machine or a hardened deployment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Test-safe values; no environment variables are read.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            session_secret: LOCAL_SESSION_SECRET.to_string(),
            session_ttl_minutes: 7 * 24 * 60,
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the environment, falling back to `Default` for
    /// anything optional.
    ///
    /// # Panics
    /// Panics when a variable required in production is missing, or when a numeric
    /// variable does not parse. The server must not start half-configured.
    pub fn load() -> Self {
        let defaults = Self::default();
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let db_url = match env {
            Env::Production => Some(
                env::var("DATABASE_URL").expect("FATAL: DATABASE_URL must be set in production."),
            ),
            Env::Local => env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
        };

        let session_secret = match env {
            Env::Production => {
                let secret = env::var("SESSION_SECRET")
                    .expect("FATAL: SESSION_SECRET must be set in production.");
                assert!(
                    secret != LOCAL_SESSION_SECRET && !secret.is_empty(),
                    "FATAL: SESSION_SECRET must be a real secret in production."
                );
                secret
            }
            Env::Local => env::var("SESSION_SECRET").unwrap_or(defaults.session_secret),
        };

        Self {
            env,
            db_url,
            session_secret,
            session_ttl_minutes: parsed("SESSION_TTL_MINUTES", defaults.session_ttl_minutes),
            argon2_memory_kib: parsed("ARGON2_MEMORY_KIB", defaults.argon2_memory_kib),
            argon2_iterations: parsed("ARGON2_ITERATIONS", defaults.argon2_iterations),
            host: env::var("APP_HOST").unwrap_or(defaults.host),
            port: parsed("APP_PORT", defaults.port),
        }
    }

    /// Session cookies carry `Secure` outside local development.
    pub fn secure_cookies(&self) -> bool {
        self.env == Env::Production
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("FATAL: {key}={raw:?} is invalid: {e}")),
        Err(_) => default,
    }
}
