//! RFC 4648 base32 helpers for shared secrets
//!
//! TOTP secrets are exchanged with authenticator apps as unpadded base32.
//! Encoding always emits the unpadded uppercase form. Decoding is lenient about
//! letter case and trailing `=` padding but rejects every other character
//! outside the alphabet, so a corrupted secret fails loudly instead of
//! producing a plausible but wrong key.

use crate::error::{Error, Result};

const ALPHABET: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// Encode bytes as unpadded RFC 4648 base32.
pub fn base32_encode(bytes: &[u8]) -> String {
    base32::encode(ALPHABET, bytes)
}

/// Decode RFC 4648 base32 into bytes.
///
/// # Arguments
///
/// * `input` - Base32 text, any case, optionally padded with trailing `=`
///
/// # Errors
///
/// Returns [`Error::Base32`] naming the first character outside the alphabet.
pub fn base32_decode(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim_end_matches('=');

    for (position, character) in trimmed.chars().enumerate() {
        if !is_base32_char(character) {
            return Err(Error::Base32 {
                character,
                position,
            });
        }
    }

    base32::decode(ALPHABET, &trimmed.to_ascii_uppercase())
        .ok_or_else(|| Error::Other(format!("Malformed base32 input of length {}", trimmed.len())))
}

fn is_base32_char(c: char) -> bool {
    matches!(c.to_ascii_uppercase(), 'A'..='Z' | '2'..='7')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_rfc4648_vectors() {
        // RFC 4648 section 10, padding stripped
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "MY");
        assert_eq!(base32_encode(b"fo"), "MZXQ");
        assert_eq!(base32_encode(b"foo"), "MZXW6");
        assert_eq!(base32_encode(b"foob"), "MZXW6YQ");
        assert_eq!(base32_encode(b"fooba"), "MZXW6YTB");
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn test_decode_accepts_padding_and_lowercase() {
        assert_eq!(base32_decode("MZXW6YQ=").unwrap(), b"foob");
        assert_eq!(base32_decode("mzxw6ytboi======").unwrap(), b"foobar");
        assert_eq!(base32_decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decode_rejects_foreign_characters() {
        match base32_decode("MZXW1YQ") {
            Err(Error::Base32 {
                character,
                position,
            }) => {
                assert_eq!(character, '1');
                assert_eq!(position, 4);
            }
            other => panic!("expected base32 error, got {:?}", other),
        }

        // Padding in the middle is not trailing padding
        assert!(base32_decode("MZ=XW6").is_err());
        assert!(base32_decode("MZXW 6YQ").is_err());
    }

    #[test]
    fn test_round_trip_twenty_byte_secret() {
        let secret: Vec<u8> = (0u8..20).collect();
        let encoded = base32_encode(&secret);
        assert_eq!(encoded.len(), 32, "160-bit secret encodes to 32 chars");
        assert_eq!(base32_decode(&encoded).unwrap(), secret);
    }

    #[test]
    fn test_round_trip_all_lengths() {
        let data: Vec<u8> = (0u8..=255).rev().collect();
        for len in 0..40 {
            let slice = &data[..len];
            assert_eq!(base32_decode(&base32_encode(slice)).unwrap(), slice);
        }
    }
}
