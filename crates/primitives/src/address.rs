//! Helpers for validating wire-format addresses.
//!
//! Upstream payloads carry addresses as strings; nothing upstream guarantees
//! they are well formed. These helpers are the single place where a string
//! becomes an [`Address`].

use alloy_primitives::Address;
use std::str::FromStr;

/// Error returned when a wire-format address string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed address: {0}")]
pub struct AddressParseError(pub String);

/// Parses a `0x`-prefixed, 40-hex-digit address string.
pub fn parse_address(s: &str) -> Result<Address, AddressParseError> {
    Address::from_str(s.trim()).map_err(|_| AddressParseError(s.to_string()))
}

/// Returns true iff the string parses as an address and is all zeros.
pub fn is_zero_address(s: &str) -> bool {
    parse_address(s).map(|addr| addr == Address::ZERO).unwrap_or(false)
}

/// Case-insensitive address-string equality.
///
/// Checksummed and lowercased renderings of the same address compare equal.
pub fn eq_address_ignore_case(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

    #[test]
    fn parses_checksummed_and_lowercase() {
        assert!(parse_address(WETH).is_ok());
        assert!(parse_address(&WETH.to_lowercase()).is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_address("").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not-an-address").is_err());
    }

    #[test]
    fn zero_detection() {
        assert!(is_zero_address("0x0000000000000000000000000000000000000000"));
        assert!(!is_zero_address(WETH));
        // malformed strings are not "zero"
        assert!(!is_zero_address("0x0"));
    }

    #[test]
    fn case_insensitive_equality() {
        assert!(eq_address_ignore_case(WETH, &WETH.to_lowercase()));
        assert!(!eq_address_ignore_case(WETH, "0x0000000000000000000000000000000000000001"));
    }
}
