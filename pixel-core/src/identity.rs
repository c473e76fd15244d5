use sha2::{Digest, Sha256};

/// Lowercase-hex SHA-256 of the input.
fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash an email address for privacy-preserving matching: trim, lowercase,
/// SHA-256. Absent or whitespace-only input hashes to `None`.
pub fn hash_email(email: Option<&str>) -> Option<String> {
    let trimmed = email?.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    Some(sha256_hex(&trimmed))
}

/// Canonicalize a phone number to E.164 before hashing. Applied uniformly
/// across all platforms:
/// - keep a leading `+` and strip every other non-digit character;
/// - a bare 10-digit number with the local trunk `0` prefix is rewritten
///   to +61 plus the remaining nine digits;
/// - anything else is hashed as its remaining digits.
pub fn hash_phone(phone: Option<&str>) -> Option<String> {
    let canonical = canonicalize_phone(phone?)?;
    Some(sha256_hex(&canonical))
}

fn canonicalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let international = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if international {
        return Some(format!("+{}", digits));
    }
    if digits.len() == 10 && digits.starts_with('0') {
        return Some(format!("+61{}", &digits[1..]));
    }
    Some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_empty_inputs() {
        assert_eq!(hash_email(None), None);
        assert_eq!(hash_email(Some("")), None);
        assert_eq!(hash_email(Some("   ")), None);
    }

    #[test]
    fn test_email_case_and_whitespace_insensitive() {
        let a = hash_email(Some("A@Example.com")).unwrap();
        let b = hash_email(Some("  a@example.com ")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_email_known_digest() {
        // sha256("a@example.com")
        assert_eq!(
            hash_email(Some("A@Example.com")).unwrap(),
            "08168cd80dfd534ab0f10af10f1303fe00af2d43ab5c1432360d137f8197e17a"
        );
    }

    #[test]
    fn test_email_deterministic() {
        assert_eq!(hash_email(Some("x@y.z")), hash_email(Some("x@y.z")));
    }

    #[test]
    fn test_phone_empty_inputs() {
        assert_eq!(hash_phone(None), None);
        assert_eq!(hash_phone(Some("")), None);
        assert_eq!(hash_phone(Some(" - ")), None);
    }

    #[test]
    fn test_phone_trunk_prefix_rewritten() {
        // 0412 345 678 and +61412345678 must match.
        let local = hash_phone(Some("0412 345 678")).unwrap();
        let international = hash_phone(Some("+61 412 345 678")).unwrap();
        assert_eq!(local, international);
    }

    #[test]
    fn test_phone_preserves_leading_plus() {
        let formatted = hash_phone(Some("+1 (555) 010-2345")).unwrap();
        let plain = hash_phone(Some("+15550102345")).unwrap();
        assert_eq!(formatted, plain);
        // Without the plus the canonical form differs.
        assert_ne!(plain, hash_phone(Some("15550102345")).unwrap());
    }
}
