//! Secret resolution — OS keychain first, environment variables second.
//!
//! The keychain is written by the setup wizard (external to this runtime);
//! here we only read. Keys are stored under the service name `companionbot`
//! with hyphenated names (`telegram-token`); the env fallback uses the same
//! name uppercased with hyphens replaced by underscores (`TELEGRAM_TOKEN`).

use tracing::debug;

const SERVICE: &str = "companionbot";

pub const TELEGRAM_TOKEN: &str = "telegram-token";
pub const ANTHROPIC_API_KEY: &str = "anthropic-api-key";
pub const OPENWEATHERMAP_API_KEY: &str = "openweathermap-api-key";
pub const BRAVE_API_KEY: &str = "brave-api-key";

/// Resolve a secret by its keychain name.
pub fn resolve(name: &str) -> Option<String> {
    if let Ok(entry) = keyring::Entry::new(SERVICE, name) {
        if let Ok(value) = entry.get_password() {
            debug!(name, "secret resolved from keychain");
            return Some(value);
        }
    }

    let env_name = name.to_uppercase().replace('-', "_");
    match std::env::var(&env_name) {
        Ok(value) if !value.is_empty() => {
            debug!(name, env = %env_name, "secret resolved from environment");
            Some(value)
        }
        _ => None,
    }
}

/// Resolve a required secret or fail with a misconfiguration error.
pub fn require(name: &str) -> crate::error::Result<String> {
    resolve(name).ok_or_else(|| {
        crate::error::CompanionError::Config(format!(
            "missing secret '{name}' (keychain service '{SERVICE}' or env {})",
            name.to_uppercase().replace('-', "_"),
        ))
    })
}
