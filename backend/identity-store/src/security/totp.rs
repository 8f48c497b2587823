/// TOTP (RFC 6238) secrets, provisioning QR codes and code verification
use crate::error::{IdentityError, Result};
use qrcode::render::svg;
use qrcode::QrCode;
use totp_lite::{totp_custom, Sha1};

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// Secret handed to the user when TOTP is enrolled
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    /// Base32 (RFC 4648, unpadded) shared secret
    pub secret: String,
    pub provisioning_uri: String,
    /// 200x200 SVG rendering of `provisioning_uri`
    pub qr_svg: String,
}

/// Generate a shared secret of `secret_len` random bytes for `account` and
/// render its provisioning QR code
pub fn enroll(issuer: &str, account: &str, secret_len: usize) -> Result<TotpEnrollment> {
    let secret = base32_encode(&crypto_core::random::random_bytes(secret_len));
    let provisioning_uri = provisioning_uri(issuer, account, &secret);

    let code = QrCode::new(provisioning_uri.as_bytes())
        .map_err(|e| IdentityError::Internal(format!("Failed to generate QR code: {}", e)))?;
    let qr_svg = code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .build();

    Ok(TotpEnrollment {
        secret,
        provisioning_uri,
        qr_svg,
    })
}

pub fn provisioning_uri(issuer: &str, account: &str, secret: &str) -> String {
    let issuer = urlencoding::encode(issuer);
    let account = urlencoding::encode(account);
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={DIGITS}&period={STEP_SECS}"
    )
}

/// Check `code` against the secret at `unix_time`, allowing one step of clock skew
pub fn verify_code(secret: &str, code: &str, unix_time: u64) -> Result<bool> {
    if code.len() != DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }

    let secret_bytes = base32_decode(secret)
        .ok_or_else(|| IdentityError::Internal("Invalid base32 TOTP secret".to_string()))?;

    let matched = [unix_time.saturating_sub(STEP_SECS), unix_time, unix_time + STEP_SECS]
        .iter()
        .any(|&t| {
            let expected = totp_custom::<Sha1>(STEP_SECS, DIGITS, &secret_bytes, t);
            constant_time_compare(code.as_bytes(), expected.as_bytes())
        });

    Ok(matched)
}

/// Code for `unix_time`; what an authenticator app would display
pub fn current_code(secret: &str, unix_time: u64) -> Result<String> {
    let secret_bytes = base32_decode(secret)
        .ok_or_else(|| IdentityError::Internal("Invalid base32 TOTP secret".to_string()))?;
    Ok(totp_custom::<Sha1>(STEP_SECS, DIGITS, &secret_bytes, unix_time))
}

fn base32_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut output = String::new();
    let mut buffer = 0u32;
    let mut buffer_size = 0;

    for byte in data {
        buffer = (buffer << 8) | (*byte as u32);
        buffer_size += 8;

        while buffer_size >= 5 {
            buffer_size -= 5;
            let index = ((buffer >> buffer_size) & 0x1f) as usize;
            output.push(ALPHABET[index] as char);
        }
    }

    if buffer_size > 0 {
        buffer <<= 5 - buffer_size;
        let index = (buffer & 0x1f) as usize;
        output.push(ALPHABET[index] as char);
    }

    output
}

fn base32_decode(data: &str) -> Option<Vec<u8>> {
    let data = data.trim_end_matches('=');
    let mut buffer = 0u32;
    let mut buffer_size = 0;
    let mut output = Vec::new();

    for ch in data.chars() {
        let value = match ch.to_ascii_uppercase() {
            c @ 'A'..='Z' => (c as u32) - ('A' as u32),
            c @ '2'..='7' => (c as u32) - ('2' as u32) + 26,
            _ => return None,
        };

        buffer = (buffer << 5) | value;
        buffer_size += 5;

        if buffer_size >= 8 {
            buffer_size -= 8;
            output.push(((buffer >> buffer_size) & 0xff) as u8);
        }
    }

    if output.is_empty() {
        return None;
    }
    Some(output)
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B seed, "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_base32_round_trip() {
        let original = b"12345678901234567890";
        let encoded = base32_encode(original);
        assert_eq!(encoded, RFC_SECRET);
        assert_eq!(base32_decode(&encoded).unwrap(), original.to_vec());
        assert!(base32_decode("not base32!").is_none());
    }

    #[test]
    fn test_rfc6238_vector() {
        // T = 59 -> 94287082 with 8 digits; the 6-digit form is 287082
        assert_eq!(current_code(RFC_SECRET, 59).unwrap(), "287082");
        assert!(verify_code(RFC_SECRET, "287082", 59).unwrap());
    }

    #[test]
    fn test_accepts_one_step_of_skew() {
        let code = current_code(RFC_SECRET, 1_000_000).unwrap();
        assert!(verify_code(RFC_SECRET, &code, 1_000_000 + STEP_SECS).unwrap());
        assert!(verify_code(RFC_SECRET, &code, 1_000_000 - STEP_SECS).unwrap());
        assert!(!verify_code(RFC_SECRET, &code, 1_000_000 + 3 * STEP_SECS).unwrap());
    }

    #[test]
    fn test_rejects_malformed_codes() {
        assert!(!verify_code(RFC_SECRET, "12345", 59).unwrap());
        assert!(!verify_code(RFC_SECRET, "abcdef", 59).unwrap());
    }

    #[test]
    fn test_enroll() {
        let enrollment = enroll("Acme Id", "alice@example.com", 20).unwrap();
        // 20 bytes -> 32 base32 characters
        assert_eq!(enrollment.secret.len(), 32);
        assert!(enrollment
            .provisioning_uri
            .starts_with("otpauth://totp/Acme%20Id:alice%40example.com?secret="));
        assert!(enrollment.qr_svg.contains("<svg"));
    }

    #[test]
    fn test_provisioning_uri_escapes_reserved_characters() {
        let uri = provisioning_uri("A&B Corp", "bob+tag@x.io", "ABC");
        assert!(uri.starts_with("otpauth://totp/A%26B%20Corp:bob%2Btag%40x.io?secret=ABC&"));
        assert!(uri.contains("&issuer=A%26B%20Corp&"));
    }
}
