//! Webhook delivery authentication.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw request body and
//! sends the result as `X-Hub-Signature-256: sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Check `signature_header` against the HMAC-SHA256 of `raw_body` under `secret`.
///
/// Returns `false` for a missing header, a header without the `sha256=` prefix,
/// hex that is malformed or not lowercase, a digest of the wrong length, or a
/// mismatch. The digest comparison is constant-time.
pub fn verify(raw_body: &[u8], signature_header: Option<&str>, secret: &str) -> bool {
    let Some(header) = signature_header else {
        return false;
    };

    let Some(hex_digest) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    // Only the lowercase form GitHub sends is accepted.
    if !hex_digest
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }

    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);

    mac.verify_slice(&expected).is_ok()
}

/// Produce the `sha256=<hex>` header value GitHub would send for `raw_body`.
pub fn sign(raw_body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw_body);
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    #[test]
    fn test_known_vector() {
        // From GitHub's webhook validation documentation.
        let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify(BODY, Some(header), SECRET));
        assert_eq!(sign(BODY, SECRET), header);
    }

    #[test]
    fn test_missing_header() {
        assert!(!verify(BODY, None, SECRET));
    }

    #[test]
    fn test_missing_prefix() {
        let header = sign(BODY, SECRET);
        let bare = header.trim_start_matches("sha256=");
        assert!(!verify(BODY, Some(bare), SECRET));
        assert!(!verify(BODY, Some(&format!("sha1={}", bare)), SECRET));
    }

    #[test]
    fn test_malformed_hex() {
        assert!(!verify(BODY, Some("sha256=not-hex-at-all"), SECRET));
        assert!(!verify(BODY, Some("sha256=abc"), SECRET));
    }

    #[test]
    fn test_wrong_length_digest() {
        assert!(!verify(BODY, Some("sha256=deadbeef"), SECRET));
        assert!(!verify(BODY, Some("sha256="), SECRET));
    }

    #[test]
    fn test_uppercase_hex_is_rejected() {
        let header = sign(BODY, SECRET);
        let upper = format!("sha256={}", header["sha256=".len()..].to_ascii_uppercase());
        assert!(!verify(BODY, Some(&upper), SECRET));

        // 'a' -> 'A' is a single 0x20 bit flip.
        let position = header.rfind(|c: char| ('a'..='f').contains(&c)).unwrap();
        let mut flipped = header.clone().into_bytes();
        flipped[position] ^= 0x20;
        let flipped = String::from_utf8(flipped).unwrap();
        assert!(!verify(BODY, Some(&flipped), SECRET));
    }

    #[test]
    fn test_wrong_secret() {
        let header = sign(BODY, SECRET);
        assert!(!verify(BODY, Some(&header), "another secret"));
    }

    #[test]
    fn test_empty_body() {
        let header = sign(b"", SECRET);
        assert!(verify(b"", Some(&header), SECRET));
    }

    proptest! {
        #[test]
        fn sign_then_verify_accepts(body in proptest::collection::vec(any::<u8>(), 0..512), secret in ".{0,40}") {
            let header = sign(&body, &secret);
            prop_assert!(verify(&body, Some(&header), &secret));
        }

        #[test]
        fn any_flipped_body_bit_is_rejected(
            body in proptest::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let header = sign(&body, SECRET);
            let mut tampered = body.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= 1 << bit;
            prop_assert!(!verify(&tampered, Some(&header), SECRET));
        }

        #[test]
        fn any_flipped_digest_bit_is_rejected(
            body in proptest::collection::vec(any::<u8>(), 0..256),
            index in 0usize..32,
            bit in 0u8..8,
        ) {
            let header = sign(&body, SECRET);
            let mut digest = hex::decode(header.trim_start_matches("sha256=")).unwrap();
            digest[index] ^= 1 << bit;
            let tampered = format!("sha256={}", hex::encode(digest));
            prop_assert!(!verify(&body, Some(&tampered), SECRET));
        }

        #[test]
        fn any_flipped_header_bit_is_rejected(
            body in proptest::collection::vec(any::<u8>(), 0..256),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut header = sign(&body, SECRET).into_bytes();
            let i = index.index(header.len());
            header[i] ^= 1 << bit;
            // A flip of the high bit leaves ASCII; such a value never reaches us as &str.
            let Ok(tampered) = String::from_utf8(header) else {
                return Ok(());
            };
            prop_assert!(!verify(&body, Some(&tampered), SECRET));
        }
    }
}
