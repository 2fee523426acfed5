/// Scans free text for the first standalone confidence-like token:
/// `0`, `0.x`, `1`, or `1.0...`. Vision models that ignore the JSON
/// instruction often still state a bare score somewhere in their
/// answer; this is the last-resort extraction for that case.
pub fn scan_confidence(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        if byte != b'0' && byte != b'1' {
            index += 1;
            continue;
        }

        let boundary_before = index == 0 || !is_token_byte(bytes[index - 1]);

        let mut end = index + 1;
        if end < bytes.len() && bytes[end] == b'.' {
            let mut digits_end = end + 1;
            while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
                digits_end += 1;
            }
            if digits_end > end + 1 {
                end = digits_end;
            }
        }

        // A trailing '.' here is sentence punctuation: a decimal
        // continuation would already have been folded into the token.
        let boundary_after = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();

        if boundary_before && boundary_after {
            if let Ok(value) = text[index..end].parse::<f64>() {
                if (0.0..=1.0).contains(&value) {
                    return Some(value);
                }
            }
        }

        index = end;
    }

    None
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'.'
}

#[cfg(test)]
mod tests {
    use super::scan_confidence;

    #[test]
    fn finds_bare_scores_in_prose() {
        assert_eq!(scan_confidence("I'd rate this 0.85 out of 1"), Some(0.85));
        assert_eq!(scan_confidence("score: 1"), Some(1.0));
        assert_eq!(scan_confidence("clearly invalid, 0"), Some(0.0));
        assert_eq!(scan_confidence("I estimate 0.55."), Some(0.55));
    }

    #[test]
    fn ignores_numbers_embedded_in_words_or_larger_values() {
        assert_eq!(scan_confidence("order ORD-000123 looks fine"), None);
        assert_eq!(scan_confidence("total was 10.50 USD"), None);
        assert_eq!(scan_confidence("1.5 is too high"), None);
        assert_eq!(scan_confidence("v0.9beta"), None);
    }

    #[test]
    fn takes_the_first_qualifying_token() {
        assert_eq!(scan_confidence("maybe 0.4, maybe 0.9"), Some(0.4));
        assert_eq!(scan_confidence(""), None);
        assert_eq!(scan_confidence("no numbers here"), None);
    }
}
