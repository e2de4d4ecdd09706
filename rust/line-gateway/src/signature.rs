/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! `X-Line-Signature` verification.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature is not valid base64")]
    MalformedSignature,
    #[error("signature mismatch")]
    Mismatch,
}

/// Check `header` against `base64(HMAC-SHA256(secret, body))`.
///
/// Runs over the raw body bytes, before any parsing.
///
/// # Errors
///
/// Any `AuthError` means the delivery must be rejected.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), AuthError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(AuthError::MissingSignature)?;
    let expected = base64::engine::general_purpose::STANDARD
        .decode(header)
        .map_err(|_| AuthError::MalformedSignature)?;

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return Err(AuthError::Mismatch);
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if constant_time_eq(&computed, &expected) {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}

/// Base64 HMAC-SHA256 of `body`, as LINE computes it.
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
