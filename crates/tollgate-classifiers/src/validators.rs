//! Checksum and format validation for structured identifiers
//!
//! These run after a catalog regex has matched, to discard candidates that
//! look right but cannot be real identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tollgate_core::ParseEnumError;

/// Entity-type letters allowed in the fourth position of a PAN
pub const PAN_ENTITY_TYPES: &str = "PCHABGJLFT";

/// Validator attached to a PII pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatValidator {
    Ssn,
    CreditCard,
    Pan,
    Aadhaar,
}

impl FormatValidator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Pan => "pan",
            Self::Aadhaar => "aadhaar",
        }
    }

    /// Validate a matched candidate
    pub fn validate(&self, candidate: &str) -> bool {
        match self {
            Self::Ssn => validate_ssn(candidate),
            Self::CreditCard => validate_credit_card(candidate),
            Self::Pan => validate_pan(candidate),
            Self::Aadhaar => validate_aadhaar(candidate),
        }
    }

    /// Whether the identifier is a digit sequence that may be embedded in a
    /// longer separated number
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Pan)
    }
}

impl fmt::Display for FormatValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatValidator {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssn" => Ok(Self::Ssn),
            "credit_card" => Ok(Self::CreditCard),
            "pan" => Ok(Self::Pan),
            "aadhaar" => Ok(Self::Aadhaar),
            _ => Err(ParseEnumError::new("format validator", s)),
        }
    }
}

/// Remove `-` and space separators. Returns `None` if anything other than
/// ASCII digits remains.
fn strip_separators(value: &str) -> Option<String> {
    let mut digits = String::with_capacity(value.len());
    for c in value.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            '-' | ' ' => {}
            _ => return None,
        }
    }
    Some(digits)
}

/// Validate a US Social Security Number.
///
/// Area `000`, `666` and `900-999` are never issued, and neither group nor
/// serial may be all zeros.
pub fn validate_ssn(value: &str) -> bool {
    let Some(digits) = strip_separators(value) else {
        return false;
    };
    if digits.len() != 9 {
        return false;
    }

    let (area, rest) = digits.split_at(3);
    let (group, serial) = rest.split_at(2);

    if area == "000" || area == "666" || area.starts_with('9') {
        return false;
    }
    group != "00" && serial != "0000"
}

/// Validate a payment card number: 13-19 digits passing the Luhn checksum
pub fn validate_credit_card(value: &str) -> bool {
    let Some(digits) = strip_separators(value) else {
        return false;
    };
    (13..=19).contains(&digits.len()) && luhn_valid(&digits)
}

/// Luhn checksum over a string of ASCII digits
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (i, b) in digits.bytes().rev().enumerate() {
        if !b.is_ascii_digit() {
            return false;
        }
        let mut d = u32::from(b - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    !digits.is_empty() && sum % 10 == 0
}

/// Validate an Indian Permanent Account Number (`AAAPA9999A` shape).
pub fn validate_pan(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    bytes[..3].iter().all(u8::is_ascii_uppercase)
        && PAN_ENTITY_TYPES.as_bytes().contains(&bytes[3])
        && bytes[4].is_ascii_uppercase()
        && bytes[5..9].iter().all(u8::is_ascii_digit)
        && bytes[9].is_ascii_uppercase()
}

/// Validate an Aadhaar number: 12 digits, never starting with 0 or 1.
///
/// The Verhoeff check digit is deliberately not enforced; detection should
/// flag plausible numbers, not only ones that were issued.
pub fn validate_aadhaar(value: &str) -> bool {
    let Some(digits) = strip_separators(value) else {
        return false;
    };
    digits.len() == 12 && matches!(digits.as_bytes()[0], b'2'..=b'9')
}

/// Payment network inferred from the card prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardNetwork {
    Visa,
    Mastercard,
    Amex,
    Discover,
    DinersClub,
    Jcb,
    Unknown,
}

impl CardNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visa => "visa",
            Self::Mastercard => "mastercard",
            Self::Amex => "amex",
            Self::Discover => "discover",
            Self::DinersClub => "diners",
            Self::Jcb => "jcb",
            Self::Unknown => "unknown",
        }
    }
}

/// Identify the card network. JCB and Discover ranges are checked before the
/// broader single-digit prefixes they overlap with.
pub fn card_network(value: &str) -> CardNetwork {
    let Some(digits) = strip_separators(value) else {
        return CardNetwork::Unknown;
    };
    let prefix = |n: usize| -> u32 { digits.get(..n).and_then(|p| p.parse().ok()).unwrap_or(0) };

    match (prefix(1), prefix(2), prefix(3), prefix(4)) {
        (_, _, _, p4) if (3528..=3589).contains(&p4) => CardNetwork::Jcb,
        (_, _, _, 6011) => CardNetwork::Discover,
        (_, 64 | 65, _, _) => CardNetwork::Discover,
        (4, _, _, _) => CardNetwork::Visa,
        (_, p2, _, _) if (51..=55).contains(&p2) => CardNetwork::Mastercard,
        (_, _, _, p4) if (2221..=2720).contains(&p4) => CardNetwork::Mastercard,
        (_, 34 | 37, _, _) => CardNetwork::Amex,
        (_, _, p3, _) if (300..=305).contains(&p3) => CardNetwork::DinersClub,
        (_, 36 | 38, _, _) => CardNetwork::DinersClub,
        _ => CardNetwork::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ssn_validation() {
        assert!(validate_ssn("123-45-6789"));
        assert!(validate_ssn("123 45 6789"));
        assert!(validate_ssn("123456789"));

        assert!(!validate_ssn("000-45-6789"));
        assert!(!validate_ssn("666-45-6789"));
        assert!(!validate_ssn("900-45-6789"));
        assert!(!validate_ssn("999-45-6789"));
        assert!(!validate_ssn("123-00-6789"));
        assert!(!validate_ssn("123-45-0000"));
        assert!(!validate_ssn("123-45-678"));
        assert!(!validate_ssn("12a-45-6789"));
    }

    #[test]
    fn test_credit_card_validation() {
        assert!(validate_credit_card("4532015112830366"));
        assert!(validate_credit_card("4532-0151-1283-0366"));
        assert!(validate_credit_card("4532 0151 1283 0366"));
        assert!(!validate_credit_card("4532015112830367"));
        assert!(!validate_credit_card("453201511283"));
        assert!(!validate_credit_card("4532-0151-1283-036x"));
    }

    #[test]
    fn test_luhn_known_numbers() {
        assert!(luhn_valid("79927398713"));
        assert!(!luhn_valid("79927398710"));
        assert!(!luhn_valid(""));
    }

    #[test]
    fn test_pan_validation() {
        assert!(validate_pan("ABCPD1234E"));
        assert!(validate_pan("AAACT1234Z"));
        assert!(!validate_pan("ABCXD1234E"));
        assert!(!validate_pan("abcpd1234e"));
        assert!(!validate_pan("ABCPD12345"));
        assert!(!validate_pan("ABCPD1234"));
    }

    #[test]
    fn test_aadhaar_validation() {
        assert!(validate_aadhaar("234567890123"));
        assert!(validate_aadhaar("2345 6789 0123"));
        assert!(validate_aadhaar("9999-8888-7777"));
        assert!(!validate_aadhaar("034567890123"));
        assert!(!validate_aadhaar("134567890123"));
        assert!(!validate_aadhaar("23456789012"));
    }

    #[test]
    fn test_card_network() {
        assert_eq!(card_network("4532015112830366"), CardNetwork::Visa);
        assert_eq!(card_network("5500 0000 0000 0004"), CardNetwork::Mastercard);
        assert_eq!(card_network("2221000000000009"), CardNetwork::Mastercard);
        assert_eq!(card_network("378282246310005"), CardNetwork::Amex);
        assert_eq!(card_network("6011111111111117"), CardNetwork::Discover);
        assert_eq!(card_network("3530111333300000"), CardNetwork::Jcb);
        assert_eq!(card_network("30569309025904"), CardNetwork::DinersClub);
        assert_eq!(card_network("9999999999999"), CardNetwork::Unknown);
    }

    #[test]
    fn test_validator_names_round_trip() {
        for v in [
            FormatValidator::Ssn,
            FormatValidator::CreditCard,
            FormatValidator::Pan,
            FormatValidator::Aadhaar,
        ] {
            assert_eq!(v.as_str().parse::<FormatValidator>().unwrap(), v);
        }
    }

    proptest! {
        #[test]
        fn prop_aadhaar_rejects_leading_zero_or_one(lead in 0u8..2, rest in "[0-9]{11}") {
            let candidate = format!("{}{}", lead, rest);
            prop_assert!(!validate_aadhaar(&candidate));
        }

        #[test]
        fn prop_aadhaar_accepts_leading_two_to_nine(lead in 2u8..10, rest in "[0-9]{11}") {
            let candidate = format!("{}{}", lead, rest);
            prop_assert!(validate_aadhaar(&candidate));
        }

        #[test]
        fn prop_ssn_rejects_reserved_areas(area in prop_oneof![Just(0u32), Just(666u32), 900u32..1000], group in 1u32..100, serial in 1u32..10000) {
            let candidate = format!("{:03}-{:02}-{:04}", area, group, serial);
            prop_assert!(!validate_ssn(&candidate));
        }

        #[test]
        fn prop_luhn_detects_single_digit_change(body in "[0-9]{15}", delta in 1u8..10) {
            // Append the check digit that makes the number valid, then corrupt it.
            let check = (0u8..10)
                .find(|d| luhn_valid(&format!("{}{}", body, d)))
                .unwrap();
            let valid = format!("{}{}", body, check);
            let tampered = format!("{}{}", body, (check + delta) % 10);
            prop_assert!(validate_credit_card(&valid));
            prop_assert!(!validate_credit_card(&tampered));
        }
    }
}
