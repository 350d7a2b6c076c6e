//! Bech32, the checksummed human-readable encoding of age keys.
//!
//! Bech32 is only used to present and accept keys outside of the age file format; it
//! never appears inside an age header.

use bech32::{FromBase32, ToBase32, Variant};
use std::fmt;

use crate::wfl;

/// Bech32 strings longer than this are rejected.
const MAX_LENGTH: usize = 90;

/// Errors returned when encoding or decoding a Bech32 string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The encoded string is longer than 90 characters.
    TooLong(usize),
    /// The string carries a Bech32m checksum instead of a Bech32 checksum.
    InvalidVariant,
    /// The string is not valid Bech32.
    ///
    /// This covers mixed case, an invalid human-readable part, a missing separator, an
    /// invalid checksum, and characters outside the data alphabet.
    Coding(bech32::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TooLong(length) => wfl!(
                f,
                "err-bech32-length",
                length = length.to_string(),
                max = MAX_LENGTH.to_string(),
            ),
            Error::InvalidVariant => wfl!(f, "err-bech32-variant"),
            Error::Coding(e) => wfl!(f, "err-bech32-coding", error = e.to_string()),
        }
    }
}

impl std::error::Error for Error {}

impl From<bech32::Error> for Error {
    fn from(e: bech32::Error) -> Self {
        Error::Coding(e)
    }
}

/// Encodes `data` with the human-readable part `hrp`.
///
/// The output is lowercase when `hrp` is lowercase. Callers that want uppercase output
/// should encode with a lowercase `hrp` and convert the result.
pub fn encode(hrp: &str, data: &[u8]) -> Result<String, Error> {
    let encoded = bech32::encode(hrp, data.to_base32(), Variant::Bech32)?;
    if encoded.len() > MAX_LENGTH {
        return Err(Error::TooLong(encoded.len()));
    }
    Ok(encoded)
}

/// Decodes a Bech32 string into its lowercased human-readable part and data.
pub fn decode(s: &str) -> Result<(String, Vec<u8>), Error> {
    if s.len() > MAX_LENGTH {
        return Err(Error::TooLong(s.len()));
    }

    let (hrp, data, variant) = bech32::decode(s)?;
    if variant != Variant::Bech32 {
        return Err(Error::InvalidVariant);
    }

    Ok((hrp, Vec::<u8>::from_base32(&data)?))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::{decode, encode, Error};

    #[test_case("a12uel5l", "a" ; "empty data")]
    #[test_case("A12UEL5L", "a" ; "uppercase")]
    #[test_case("abcdef1qpzry9x8gf2tvdw0s3jn54khce6mua7lmqqqxw", "abcdef" ; "all data characters")]
    #[test_case(
        "split1checkupstagehandshakeupstreamerranterredcaperred2y9e3w",
        "split" ;
        "long data"
    )]
    fn valid_strings(s: &str, hrp: &str) {
        let (decoded_hrp, _) = decode(s).unwrap();
        assert_eq!(decoded_hrp, hrp);
    }

    #[test_case("\x201nwldj5" ; "hrp character out of range")]
    #[test_case("\x7f1axkwrx" ; "hrp character is DEL")]
    #[test_case("pzry9x0s0muk" ; "no separator")]
    #[test_case("1pzry9x0s0muk" ; "empty hrp")]
    #[test_case("x1b4n0q5v" ; "invalid data character")]
    #[test_case("li1dgmt3" ; "checksum too short")]
    #[test_case("A1G7SGD8" ; "checksum over uppercase hrp")]
    #[test_case("A12uEL5L" ; "mixed case")]
    #[test_case("a12uel5m" ; "invalid checksum")]
    fn invalid_strings(s: &str) {
        assert!(matches!(decode(s), Err(Error::Coding(_))));
    }

    #[test]
    fn rejects_long_strings() {
        assert_eq!(
            decode(
                "an84characterslonghumanreadablepartthatcontainsthenumber1andtheexcludedcharactersbio1569pvx"
            ),
            Err(Error::TooLong(91))
        );
        assert!(encode("age", &[0; 60]).is_err());

        let msg = Error::TooLong(91).to_string();
        assert!(msg.contains("91") && msg.contains("90"));
    }

    #[test]
    fn rejects_bech32m() {
        // Valid Bech32m, from BIP 350.
        assert_eq!(decode("a1lqfn3a"), Err(Error::InvalidVariant));
    }

    #[test]
    fn key_round_trip() {
        let data = [42; 32];
        let encoded = encode("age", &data).unwrap();
        assert!(encoded.starts_with("age1"));
        assert_eq!(decode(&encoded).unwrap(), ("age".to_owned(), data.to_vec()));
        assert_eq!(
            decode(&encoded.to_uppercase()).unwrap(),
            ("age".to_owned(), data.to_vec())
        );
    }
}
