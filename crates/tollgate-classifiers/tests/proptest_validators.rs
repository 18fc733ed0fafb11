//! Property-based tests for format validators and pattern safety

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use tollgate_classifiers::validators::luhn_valid;
use tollgate_classifiers::{
    validate_aadhaar, validate_credit_card, validate_pan, validate_pattern, validate_ssn,
    FormatValidator,
};

proptest! {
    /// Validators never panic on any input
    #[test]
    fn validators_no_panic(input in ".*") {
        let _ = validate_ssn(&input);
        let _ = validate_credit_card(&input);
        let _ = validate_pan(&input);
        let _ = validate_aadhaar(&input);
    }

    /// Exactly one check digit completes any card payload
    #[test]
    fn luhn_has_one_check_digit(payload in "[0-9]{12,18}") {
        let valid: Vec<u32> = (0..10)
            .filter(|d| luhn_valid(&format!("{payload}{d}")))
            .collect();
        prop_assert_eq!(valid.len(), 1);
        let card = format!("{payload}{}", valid[0]);
        prop_assert!(validate_credit_card(&card));
    }

    /// Well-formed SSNs outside the reserved ranges validate, with or without separators
    #[test]
    fn issued_ssns_validate(area in 1u32..900, group in 1u32..100, serial in 1u32..10000) {
        prop_assume!(area != 666);
        let dashed = format!("{area:03}-{group:02}-{serial:04}");
        prop_assert!(validate_ssn(&dashed));
        prop_assert!(FormatValidator::Ssn.validate(&dashed));
    }

    /// Reserved SSN areas never validate
    #[test]
    fn reserved_ssn_areas_rejected(area in prop_oneof![Just(0u32), Just(666u32), 900u32..1000], group in 1u32..100, serial in 1u32..10000) {
        let ssn = format!("{area:03}-{group:02}-{serial:04}");
        prop_assert!(!validate_ssn(&ssn));
    }

    /// Aadhaar numbers starting with 0 or 1 never validate
    #[test]
    fn aadhaar_leading_digit(first in 0u8..10, rest in "[0-9]{11}") {
        let number = format!("{first}{rest}");
        prop_assert_eq!(validate_aadhaar(&number), first >= 2);
    }

    /// Lowercase PANs are rejected
    #[test]
    fn pan_requires_uppercase(pan in "[a-z]{3}p[a-z][0-9]{4}[a-z]") {
        prop_assert!(!validate_pan(&pan));
        prop_assert!(validate_pan(&pan.to_uppercase()));
    }

    /// Plain literal patterns always pass safety validation
    #[test]
    fn literal_patterns_are_safe(word in "[a-z]{1,40}") {
        prop_assert!(validate_pattern(&word).is_ok());
    }

    /// Nested quantifiers are always refused
    #[test]
    fn nested_quantifiers_refused(atom in "[a-z]{1,5}", inner in "[+*]", outer in "[+*]") {
        let pattern = format!("({atom}{inner}){outer}");
        prop_assert!(validate_pattern(&pattern).is_err());
    }
}
