//! TOTP enrollment and verification (SHA1, 6 digits, 30 s step, ±1 step)

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECS: u64 = 30;

fn build(secret_base32: &str, issuer: &str, account: &str) -> Result<TOTP> {
    let bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("Invalid TOTP secret: {:?}", e))?;

    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECS,
        bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| anyhow!("TOTP init: {}", e))
}

/// Generate a new secret; returns `(base32_secret, otpauth_uri)`
pub fn generate_enrollment(issuer: &str, account: &str) -> Result<(String, String)> {
    let secret = Secret::generate_secret().to_encoded().to_string();
    let uri = build(&secret, issuer, account)?.get_url();
    Ok((secret, uri))
}

/// Check a code at the given unix time
pub fn verify_code_at(
    secret_base32: &str,
    code: &str,
    issuer: &str,
    account: &str,
    unix_time: u64,
) -> Result<bool> {
    if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }
    Ok(build(secret_base32, issuer, account)?.check(code, unix_time))
}

/// Check a code against the current time
pub fn verify_code(secret_base32: &str, code: &str, issuer: &str, account: &str) -> Result<bool> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    verify_code_at(secret_base32, code, issuer, account, now)
}

/// Code for the given time; used by enrollment tests and tooling
pub fn generate_code_at(secret_base32: &str, issuer: &str, account: &str, unix_time: u64) -> Result<String> {
    Ok(build(secret_base32, issuer, account)?.generate(unix_time))
}
