//! Address and key format validation
//!
//! Validation only checks the textual format (`0x` + hex); mixed-case
//! checksums are produced for derived addresses but never required on input.

use regex::Regex;
use sha3::{Digest, Keccak256};

lazy_static::lazy_static! {
    /// EVM account address: 0x followed by 40 hex digits
    static ref ADDRESS_RE: Regex =
        Regex::new(r"^0[xX][a-fA-F0-9]{40}$").expect("Invalid address regex");

    /// secp256k1 private key: 0x followed by 64 hex digits
    static ref PRIVATE_KEY_RE: Regex =
        Regex::new(r"^0x[a-fA-F0-9]{64}$").expect("Invalid private key regex");
}

pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_RE.is_match(address.trim())
}

pub fn is_valid_private_key(key: &str) -> bool {
    PRIVATE_KEY_RE.is_match(key.trim())
}

/// EIP-55 mixed-case form of a 20-byte account address
pub fn checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());

    let checksummed: String = lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
            if nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect();

    format!("0x{}", checksummed)
}

/// Shorten an address for display: `0x1234...abcd`
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        address.to_string()
    }
}
