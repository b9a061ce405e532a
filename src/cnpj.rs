// 🔢 CNPJ Normalizer/Validator
// Canonical 14-digit form + mathematical check-digit validation.
//
// Validation is advisory: downstream stages attach the result as a flag
// (CNPJ_Valido) and never drop rows on failure. Reference CNPJs are
// sometimes malformed in the upstream government export, but the expense
// signal is still usable for regional/operator aggregation.

/// Weights for the first check digit (positions 1-12)
const WEIGHTS_FIRST: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Weights for the second check digit (positions 1-13)
const WEIGHTS_SECOND: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Normalize a CNPJ to its canonical 14-digit form.
///
/// Strips every non-digit character and left-pads with zeros to 14.
/// Missing input yields the empty string (which `is_valid_cnpj` rejects
/// on length). Idempotent on string inputs.
pub fn normalize_cnpj(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(s) => s,
        None => return String::new(),
    };

    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{:0>14}", digits)
}

/// Mathematical CNPJ validation (modulo-11 check digits).
///
/// Rejects:
/// - normalized length != 14
/// - all 14 digits identical (placeholder ids like 00000000000000)
/// - either computed check digit not matching digits 13/14
pub fn is_valid_cnpj(raw: Option<&str>) -> bool {
    let cnpj = normalize_cnpj(raw);

    if cnpj.len() != 14 {
        return false;
    }

    let digits: Vec<u32> = match cnpj.chars().map(|c| c.to_digit(10)).collect() {
        Some(d) => d,
        None => return false,
    };

    // Placeholder/sentinel ids: all digits identical
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    if check_digit(&digits[..12], &WEIGHTS_FIRST) != digits[12] {
        return false;
    }

    check_digit(&digits[..13], &WEIGHTS_SECOND) == digits[13]
}

/// Modulo-11 check digit: remainder below 2 maps to 0, otherwise 11 - remainder
fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;

    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}
