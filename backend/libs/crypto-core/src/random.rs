use rand::{rngs::OsRng, Rng, RngCore};

const LETTERS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-";
const DIGITS: &[u8] = b"0123456789";

/// Fill a fresh buffer from the OS random source
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a random code of `len` characters.
///
/// Numeric codes are meant to be typed by a user; the alphanumeric alphabet
/// also contains `-` so codes stay URL safe.
pub fn random_code(numeric_only: bool, len: usize) -> String {
    let alphabet = if numeric_only { DIGITS } else { LETTERS };
    let mut rng = OsRng;
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_length() {
        assert_eq!(random_bytes(20).len(), 20);
        assert!(random_bytes(0).is_empty());
    }

    #[test]
    fn test_numeric_code_only_digits() {
        let code = random_code(true, 8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_alphanumeric_code_alphabet() {
        let code = random_code(false, 64);
        assert_eq!(code.len(), 64);
        assert!(code
            .bytes()
            .all(|b| LETTERS.contains(&b)));
    }
}
