use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};

/// Decodes a stanza argument that must be canonical Base64 of exactly `N` bytes.
pub(crate) fn base64_arg<A: AsRef<[u8]>, const N: usize>(arg: &A) -> Option<[u8; N]> {
    if arg.as_ref().len() != ((4 * N) + 2) / 3 {
        return None;
    }

    BASE64_STANDARD_NO_PAD.decode(arg).ok()?.try_into().ok()
}

/// Encodes a stanza argument.
pub(crate) fn encode_arg(data: &[u8]) -> String {
    BASE64_STANDARD_NO_PAD.encode(data)
}
