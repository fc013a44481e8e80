//! Payment webhook signature verification using HMAC-SHA256.
//!
//! Every provider signs the exact raw request body with a shared secret; they
//! differ only in how the digest is written into the header:
//!
//! | Provider | Header              | Encoding                       |
//! |----------|---------------------|--------------------------------|
//! | Adyen    | `hmac-signature`    | base64                         |
//! | GoPay    | `signature`         | hex                            |
//! | WePay    | `x-wepay-signature` | hex, optionally `sha256=` prefixed |

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use model::PaymentProvider;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// How a provider encodes the digest in its signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Base64,
    Hex,
    /// Hex, with an optional `sha256=` prefix.
    PrefixedHex,
}

impl SignatureEncoding {
    pub const fn for_provider(provider: PaymentProvider) -> Self {
        match provider {
            PaymentProvider::Adyen => SignatureEncoding::Base64,
            PaymentProvider::GoPay => SignatureEncoding::Hex,
            PaymentProvider::WePay => SignatureEncoding::PrefixedHex,
        }
    }
}

/// Header carrying the signature for `provider`.
pub const fn signature_header(provider: PaymentProvider) -> &'static str {
    match provider {
        PaymentProvider::Adyen => "hmac-signature",
        PaymentProvider::GoPay => "signature",
        PaymentProvider::WePay => "x-wepay-signature",
    }
}

/// Decodes a signature header value into raw digest bytes.
///
/// Returns `None` for malformed values. Never panics.
pub fn decode_signature(header: &str, encoding: SignatureEncoding) -> Option<Vec<u8>> {
    let header = header.trim();
    match encoding {
        SignatureEncoding::Base64 => BASE64.decode(header).ok(),
        SignatureEncoding::Hex => hex::decode(header).ok(),
        SignatureEncoding::PrefixedHex => {
            hex::decode(header.strip_prefix("sha256=").unwrap_or(header)).ok()
        }
    }
}

/// Computes the HMAC-SHA256 digest of a payload.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    HmacSha256::new_from_slice(secret)
        .map(|mut mac| {
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        })
        .unwrap_or_default()
}

/// Formats a digest the way the provider sends it.
pub fn format_signature(signature: &[u8], encoding: SignatureEncoding) -> String {
    match encoding {
        SignatureEncoding::Base64 => BASE64.encode(signature),
        SignatureEncoding::Hex => hex::encode(signature),
        SignatureEncoding::PrefixedHex => format!("sha256={}", hex::encode(signature)),
    }
}

/// Verifies a webhook signature against the raw payload.
///
/// An empty secret never verifies. The comparison is constant-time
/// (`Mac::verify_slice`).
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &[u8],
    encoding: SignatureEncoding,
) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(expected) = decode_signature(signature_header, encoding) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ENCODINGS: [SignatureEncoding; 3] = [
        SignatureEncoding::Base64,
        SignatureEncoding::Hex,
        SignatureEncoding::PrefixedHex,
    ];

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2.
        let sig = compute_signature(b"what do ya want for nothing?", b"Jefe");
        assert_eq!(
            hex::encode(sig),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_round_trip_each_encoding() {
        let body = br#"{"state":"PAID"}"#;
        let sig = compute_signature(body, b"secret");
        for encoding in ENCODINGS {
            let header = format_signature(&sig, encoding);
            assert!(verify_signature(body, &header, b"secret", encoding), "{encoding:?}");
        }
    }

    #[test]
    fn test_wepay_accepts_bare_hex() {
        let sig = compute_signature(b"{}", b"secret");
        assert!(verify_signature(
            b"{}",
            &hex::encode(&sig),
            b"secret",
            SignatureEncoding::PrefixedHex
        ));
    }

    #[test]
    fn test_gopay_accepts_uppercase_hex() {
        let sig = compute_signature(b"{}", b"secret");
        let header = hex::encode(&sig).to_uppercase();
        assert!(verify_signature(b"{}", &header, b"secret", SignatureEncoding::Hex));
    }

    #[test]
    fn test_empty_secret_fails_closed() {
        let sig = compute_signature(b"{}", b"");
        let header = format_signature(&sig, SignatureEncoding::Hex);
        assert!(!verify_signature(b"{}", &header, b"", SignatureEncoding::Hex));
    }

    #[test]
    fn test_malformed_headers() {
        assert!(!verify_signature(b"{}", "", b"secret", SignatureEncoding::Hex));
        assert!(!verify_signature(b"{}", "zz", b"secret", SignatureEncoding::Hex));
        assert!(!verify_signature(b"{}", "not base64!", b"secret", SignatureEncoding::Base64));
        assert!(!verify_signature(b"{}", "sha1=abcd", b"secret", SignatureEncoding::PrefixedHex));
    }

    #[test]
    fn test_wrong_encoding_fails() {
        let sig = compute_signature(b"{}", b"secret");
        let header = format_signature(&sig, SignatureEncoding::Hex);
        assert!(!verify_signature(b"{}", &header, b"secret", SignatureEncoding::Base64));
    }

    proptest! {
        #[test]
        fn prop_valid_signature_verifies(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            secret in proptest::collection::vec(any::<u8>(), 1..64),
            idx in 0usize..3,
        ) {
            let encoding = ENCODINGS[idx];
            let header = format_signature(&compute_signature(&payload, &secret), encoding);
            prop_assert!(verify_signature(&payload, &header, &secret, encoding));
        }

        #[test]
        fn prop_flipped_payload_byte_fails(
            payload in proptest::collection::vec(any::<u8>(), 1..512),
            secret in proptest::collection::vec(any::<u8>(), 1..64),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let header = format_signature(&compute_signature(&payload, &secret), SignatureEncoding::Hex);
            let mut tampered = payload.clone();
            let i = pos.index(tampered.len());
            tampered[i] ^= 1 << bit;
            prop_assert!(!verify_signature(&tampered, &header, &secret, SignatureEncoding::Hex));
        }

        #[test]
        fn prop_flipped_signature_byte_fails(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            secret in proptest::collection::vec(any::<u8>(), 1..64),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut sig = compute_signature(&payload, &secret);
            let i = pos.index(sig.len());
            sig[i] ^= 1 << bit;
            let header = format_signature(&sig, SignatureEncoding::Base64);
            prop_assert!(!verify_signature(&payload, &header, &secret, SignatureEncoding::Base64));
        }

        #[test]
        fn prop_wrong_secret_fails(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            secret in proptest::collection::vec(1u8..=255, 1..64),
            other in proptest::collection::vec(1u8..=255, 1..64),
        ) {
            // Keys are zero-padded to the block size, so avoid zero bytes.
            prop_assume!(secret != other);
            let header = format_signature(&compute_signature(&payload, &secret), SignatureEncoding::Hex);
            prop_assert!(!verify_signature(&payload, &header, &other, SignatureEncoding::Hex));
        }

        #[test]
        fn prop_garbage_header_never_panics(header in ".*") {
            for encoding in ENCODINGS {
                let _ = verify_signature(b"{}", &header, b"secret", encoding);
            }
        }
    }
}
