//! Address text normalization shared by the scrape-output normalizer
//! (stage 1) and the DPE matcher (stage 4).

use once_cell::sync::Lazy;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// Uppercases, strips accents via NFD decomposition + combining-mark
/// removal, drops everything but word characters and spaces, and
/// collapses whitespace. Used for both address and city normalization in
/// stage 1; keeps ASCII letters/digits only so downstream string matching
/// never has to worry about encoding.
pub fn strip_accents_upper(input: &str) -> String {
    let upper = input.to_uppercase();
    let decomposed: String = upper.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let cleaned: String = decomposed
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    collapse_whitespace(&cleaned)
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

static ROAD_TYPE_ABBREVIATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("AVENUE", "AV"),
        ("BOULEVARD", "BD"),
        ("PLACE", "PL"),
        ("ALLEE", "AL"),
        ("IMPASSE", "IMP"),
    ])
});

/// Address normalization tuned for DPE text matching: strips accents,
/// removes parenthetical asides and punctuation, folds common road-type
/// words to their abbreviation, and strips postal codes (which would
/// otherwise overweight an unrelated digit run in the similarity score).
pub fn normalize_for_matching(address: &str) -> String {
    if address.trim().is_empty() || address.eq_ignore_ascii_case("nan") {
        return String::new();
    }
    let mut s = strip_accents_upper(address);
    for (full, abbr) in ROAD_TYPE_ABBREVIATIONS.iter() {
        s = s.replace(&format!(" {full} "), &format!(" {abbr} "));
    }
    s = strip_postal_codes(&s);
    collapse_whitespace(&s)
}

fn strip_postal_codes(s: &str) -> String {
    s.split_whitespace()
        .filter(|tok| !(tok.len() == 5 && tok.chars().all(|c| c.is_ascii_digit())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parsed address components, focused on the leading street number since
/// that's the strongest discriminator between two otherwise-similar
/// addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressComponents {
    pub number: Option<String>,
    pub street: String,
    pub city: String,
}

/// Splits a normalized (uppercase, accent-free) address into a leading
/// street number, street name, and trailing city fragment.
pub fn parse_address(address: &str) -> AddressComponents {
    let address = address.trim();
    if address.is_empty() || address.eq_ignore_ascii_case("nan") {
        return AddressComponents::default();
    }

    let upper = strip_accents_upper(address);
    let mut chars = upper.chars().peekable();
    let mut number = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            number.push(c);
            chars.next();
        } else {
            break;
        }
    }
    // Allow a single trailing letter (e.g. "12B").
    if !number.is_empty() {
        if let Some(&c) = chars.peek() {
            if c.is_alphabetic() {
                number.push(c);
                chars.next();
            }
        }
    }
    let rest: String = chars.collect();
    let rest = rest.trim_start();

    let number = if number.is_empty() { None } else { Some(number) };

    if let Some((street, city)) = rest.split_once(',') {
        return AddressComponents {
            number,
            street: street.trim().to_string(),
            city: city.trim().to_string(),
        };
    }

    if let Some(pos) = find_postal_code(rest) {
        let (street, city) = rest.split_at(pos);
        return AddressComponents {
            number,
            street: street.trim().to_string(),
            city: city.trim().to_string(),
        };
    }

    AddressComponents {
        number,
        street: rest.to_string(),
        city: String::new(),
    }
}

fn find_postal_code(s: &str) -> Option<usize> {
    let bytes: Vec<char> = s.chars().collect();
    for start in 0..bytes.len() {
        if start + 5 <= bytes.len() {
            let candidate: String = bytes[start..start + 5].iter().collect();
            if candidate.chars().all(|c| c.is_ascii_digit()) {
                let boundary_ok = start == 0 || !bytes[start - 1].is_ascii_digit();
                if boundary_ok {
                    return Some(start);
                }
            }
        }
    }
    None
}

/// Street-number tolerance for DPE matching: exact match, or within ±2 to
/// absorb data-entry drift between the listings site and the certificate
/// dataset.
pub fn street_numbers_match(a: &Option<String>, b: &Option<String>) -> bool {
    let (Some(a), Some(b)) = (a, b) else { return false };
    let a_digits: String = a.chars().filter(|c| c.is_ascii_digit()).collect();
    let b_digits: String = b.chars().filter(|c| c.is_ascii_digit()).collect();
    if a_digits == b_digits {
        return true;
    }
    match (a_digits.parse::<i64>(), b_digits.parse::<i64>()) {
        (Ok(a), Ok(b)) => (a - b).abs() <= 2,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_uppercases() {
        assert_eq!(strip_accents_upper("12 rue de l'Église"), "12 RUE DE L EGLISE");
    }

    #[test]
    fn normalizes_road_type_and_postal_code() {
        let normalized = normalize_for_matching("14 Avenue Victor Hugo 75016 Paris");
        assert!(normalized.contains("AV"));
        assert!(!normalized.contains("75016"));
    }

    #[test]
    fn parses_leading_number_and_street() {
        let parsed = parse_address("12B Rue Foo, Lyon");
        assert_eq!(parsed.number, Some("12B".to_string()));
        assert_eq!(parsed.street, "RUE FOO");
        assert_eq!(parsed.city, "LYON");
    }

    #[test]
    fn street_number_tolerance_allows_off_by_two() {
        assert!(street_numbers_match(&Some("12".to_string()), &Some("14".to_string())));
        assert!(!street_numbers_match(&Some("12".to_string()), &Some("20".to_string())));
    }
}
