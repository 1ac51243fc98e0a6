//! Deterministic cache key derivation.
//!
//! The key is the first 16 hex characters of a SHA-256 digest over a
//! canonical encoding of `(message, model, max_tokens, temperature,
//! system_prompt)`. Every field is length-prefixed or fixed-width so no two
//! distinct tuples share an encoding (e.g. `model="a|b"` vs `model="a"`
//! followed by `"|b"` elsewhere).

use sha2::{Digest, Sha256};

/// Length of a derived key in hex characters.
pub const KEY_LEN: usize = 16;

/// Encoding version. Bump when the canonical form changes so old snapshots
/// simply miss instead of colliding.
const KEY_DOMAIN: &[u8] = b"tallychat.cache.v1";

const TAG_NONE: u8 = 0;
const TAG_SOME: u8 = 1;

/// Derive the cache key for one request.
///
/// An absent system prompt and an empty or whitespace-only one encode the
/// same way, since both send no system prompt upstream. `-0.0` and `0.0`
/// temperatures are treated as equal.
pub fn derive_key(
    message: &str,
    model: &str,
    max_tokens: u32,
    temperature: f64,
    system_prompt: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(KEY_DOMAIN);
    update_str(&mut hasher, message);
    update_str(&mut hasher, model);
    hasher.update(max_tokens.to_le_bytes());
    hasher.update(normalize_temperature(temperature).to_bits().to_le_bytes());
    match system_prompt.filter(|s| !s.trim().is_empty()) {
        Some(system) => {
            hasher.update([TAG_SOME]);
            update_str(&mut hasher, system);
        }
        None => hasher.update([TAG_NONE]),
    }
    let digest = hex::encode(hasher.finalize());
    digest[..KEY_LEN].to_string()
}

fn update_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn normalize_temperature(t: f64) -> f64 {
    if t == 0.0 {
        0.0
    } else {
        t
    }
}
