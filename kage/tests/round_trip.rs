use kage::{
    armor::{ArmoredWriter, Format},
    scrypt,
    secrecy::SecretString,
    x25519, AgeFile, DecryptError, Decryptor, EncryptError, Encryptor, Identity, Recipient,
};
use std::io::{self, Read, Write};
use std::iter;
use test_case::test_case;

const CHUNK_SIZE: usize = 64 * 1024;
const TAG_SIZE: usize = 16;
const NONCE_SIZE: usize = 16;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn decrypt_with(identities: &[&dyn Identity], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    kage::decrypt_stream(identities.iter().copied(), ciphertext, vec![])
}

#[test_case(0, NONCE_SIZE + TAG_SIZE ; "empty")]
#[test_case(1, NONCE_SIZE + 1 + TAG_SIZE ; "one byte")]
#[test_case(CHUNK_SIZE - 1, NONCE_SIZE + CHUNK_SIZE - 1 + TAG_SIZE ; "short chunk")]
#[test_case(CHUNK_SIZE, NONCE_SIZE + CHUNK_SIZE + TAG_SIZE ; "full chunk")]
#[test_case(CHUNK_SIZE + 1, NONCE_SIZE + CHUNK_SIZE + 1 + 2 * TAG_SIZE ; "chunk and a byte")]
#[test_case(2 * CHUNK_SIZE, NONCE_SIZE + 2 * (CHUNK_SIZE + TAG_SIZE) ; "two full chunks")]
fn payload_sizes(len: usize, body_len: usize) {
    init();
    let identity = x25519::Identity::generate();
    let recipient = identity.to_public();
    let plaintext = payload(len);

    let file = kage::encrypt_to_file([&recipient as &dyn Recipient], &plaintext[..]).unwrap();
    assert_eq!(file.body().len(), body_len);

    let mut encrypted = vec![];
    file.write(&mut encrypted).unwrap();
    assert_eq!(AgeFile::read(&encrypted[..]).unwrap(), file);

    assert_eq!(decrypt_with(&[&identity], &encrypted).unwrap(), plaintext);
}

#[test]
fn armored_sizes() {
    init();
    let identity = x25519::Identity::generate();
    let recipient = identity.to_public();

    for len in [0, 1, 47, 48, 49, CHUNK_SIZE, CHUNK_SIZE + 1] {
        let plaintext = payload(len);
        let armored = kage::encrypt_and_armor(&recipient, &plaintext).unwrap();
        assert!(armored.lines().all(|l| l.len() <= 64));
        assert_eq!(kage::decrypt(&identity, armored.as_bytes()).unwrap(), plaintext);
    }
}

#[test]
fn armor_is_detected_after_leading_whitespace() {
    let identity = x25519::Identity::generate();
    let armored = kage::encrypt_and_armor(&identity.to_public(), b"hello").unwrap();

    let padded = format!("\n  \r\n{}\n\n", armored);
    assert_eq!(kage::decrypt(&identity, padded.as_bytes()).unwrap(), b"hello");

    let crlf = armored.replace('\n', "\r\n");
    assert_eq!(kage::decrypt(&identity, crlf.as_bytes()).unwrap(), b"hello");
}

#[test]
fn manual_armoring() {
    let identity = x25519::Identity::generate();
    let recipient = identity.to_public();

    let mut encrypted = vec![];
    let mut w = Encryptor::with_recipients(iter::once(&recipient as _))
        .unwrap()
        .wrap_output(ArmoredWriter::wrap_output(&mut encrypted, Format::AsciiArmor).unwrap())
        .unwrap();
    w.write_all(b"armored by hand").unwrap();
    w.finish().and_then(|armor| armor.finish()).unwrap();

    let mut decrypted = vec![];
    Decryptor::new(&encrypted[..])
        .unwrap()
        .decrypt(iter::once(&identity as &dyn Identity))
        .unwrap()
        .read_to_end(&mut decrypted)
        .unwrap();
    assert_eq!(decrypted, b"armored by hand");
}

/// Finds the line starting with `prefix`, skipping `skip` earlier matches.
fn line_offset(data: &[u8], prefix: &[u8], skip: usize) -> usize {
    data.windows(prefix.len() + 1)
        .enumerate()
        .filter(|(_, w)| w[0] == b'\n' && &w[1..] == prefix)
        .nth(skip)
        .map(|(i, _)| i + 1)
        .expect("line is present")
}

/// Finds the body line of the stanza starting with `prefix`.
fn body_offset(data: &[u8], prefix: &[u8], skip: usize) -> usize {
    let stanza = line_offset(data, prefix, skip);
    stanza
        + data[stanza..]
            .iter()
            .position(|b| *b == b'\n')
            .expect("stanza line ends")
        + 1
}

/// Swaps a Base64 character for another one with the same trailing bits.
fn flip_base64(c: &mut u8) {
    *c = if *c == b'A' { b'B' } else { b'A' };
}

#[test]
fn tampered_mac_is_rejected() {
    let identity = x25519::Identity::generate();
    let mut encrypted = kage::encrypt(&identity.to_public(), b"tamper").unwrap();

    let footer = line_offset(&encrypted, b"--- ", 0);
    flip_base64(&mut encrypted[footer + 4]);

    assert!(matches!(
        decrypt_with(&[&identity], &encrypted),
        Err(DecryptError::IncorrectHmac)
    ));
}

#[test]
fn tampered_stanza_argument_is_rejected() {
    let sk1 = x25519::Identity::generate();
    let sk2 = x25519::Identity::generate();
    let (pk1, pk2) = (sk1.to_public(), sk2.to_public());

    let mut encrypted = kage::encrypt_stream(
        [&pk1 as &dyn Recipient, &pk2],
        &b"tamper"[..],
        vec![],
        false,
    )
    .unwrap();

    // The first stanza still unwraps the file key, which no longer matches the MAC.
    let second = line_offset(&encrypted, b"-> X25519 ", 1);
    flip_base64(&mut encrypted[second + 10]);

    assert!(matches!(
        decrypt_with(&[&sk1], &encrypted),
        Err(DecryptError::IncorrectHmac)
    ));
}

#[test]
fn tampered_stanza_body_is_rejected() {
    let sk1 = x25519::Identity::generate();
    let sk2 = x25519::Identity::generate();
    let (pk1, pk2) = (sk1.to_public(), sk2.to_public());

    let mut encrypted = kage::encrypt_stream(
        [&pk1 as &dyn Recipient, &pk2],
        &b"tamper"[..],
        vec![],
        false,
    )
    .unwrap();
    let second = body_offset(&encrypted, b"-> X25519 ", 1);
    flip_base64(&mut encrypted[second]);

    // The untouched stanza still yields the file key, but the MAC covers every body.
    assert!(matches!(
        decrypt_with(&[&sk1], &encrypted),
        Err(DecryptError::IncorrectHmac)
    ));

    // The tampered stanza no longer opens for its own key.
    match decrypt_with(&[&sk2], &encrypted) {
        Err(DecryptError::NoMatchingIdentities(failures)) => {
            assert!(matches!(failures[..], [DecryptError::IncorrectIdentity]));
        }
        res => panic!("expected NoMatchingIdentities, got {:?}", res.map(|_| ())),
    }
}

#[test]
fn tampered_scrypt_body_is_rejected() {
    let mut recipient = scrypt::Recipient::new(SecretString::new("mypass1".to_owned()));
    recipient.set_work_factor(2);
    let identity = scrypt::Identity::new(SecretString::new("mypass1".to_owned()));

    let mut encrypted = kage::encrypt(&recipient, b"tamper").unwrap();
    let body = body_offset(&encrypted, b"-> scrypt ", 0);
    flip_base64(&mut encrypted[body]);

    match decrypt_with(&[&identity], &encrypted) {
        Err(DecryptError::NoMatchingIdentities(failures)) => {
            assert!(matches!(failures[..], [DecryptError::IncorrectIdentity]));
        }
        res => panic!("expected NoMatchingIdentities, got {:?}", res.map(|_| ())),
    }
}

#[test]
fn tampered_payload_is_rejected() {
    let identity = x25519::Identity::generate();
    let mut encrypted = kage::encrypt(&identity.to_public(), &payload(1000)).unwrap();
    if let Some(last) = encrypted.last_mut() {
        *last ^= 1;
    }

    match decrypt_with(&[&identity], &encrypted) {
        Err(DecryptError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
        res => panic!("expected a decryption failure, got {:?}", res.map(|_| ())),
    }
}

#[test]
fn truncated_payload_is_rejected() {
    let identity = x25519::Identity::generate();
    let encrypted = kage::encrypt(&identity.to_public(), &payload(CHUNK_SIZE + 1)).unwrap();

    // Drop the final chunk entirely.
    let truncated = &encrypted[..encrypted.len() - 1 - TAG_SIZE];
    assert!(matches!(
        decrypt_with(&[&identity], truncated),
        Err(DecryptError::Io(_))
    ));
}

#[test]
fn identities_are_tried_in_order() {
    init();
    let right = x25519::Identity::generate();
    let wrong = x25519::Identity::generate();
    let encrypted = kage::encrypt(&right.to_public(), b"ordered").unwrap();

    assert_eq!(
        decrypt_with(&[&wrong, &right], &encrypted).unwrap(),
        b"ordered"
    );

    match decrypt_with(&[&wrong], &encrypted) {
        Err(DecryptError::NoMatchingIdentities(failures)) => {
            assert!(matches!(failures[..], [DecryptError::IncorrectIdentity]));
        }
        res => panic!("expected NoMatchingIdentities, got {:?}", res.map(|_| ())),
    }
}

#[test]
fn passphrase_file() {
    init();
    let mut recipient = scrypt::Recipient::new(SecretString::new("mypass1".to_owned()));
    recipient.set_work_factor(2);

    let encrypted = kage::encrypt(&recipient, b"this is my file").unwrap();
    let header = Decryptor::new(&encrypted[..]).unwrap();
    assert!(header.is_scrypt());

    let identity = scrypt::Identity::new(SecretString::new("mypass1".to_owned()));
    assert_eq!(
        kage::decrypt(&identity, &encrypted).unwrap(),
        b"this is my file"
    );

    // An X25519 identity ahead of the passphrase is skipped.
    let other = x25519::Identity::generate();
    assert_eq!(
        decrypt_with(&[&other, &identity], &encrypted).unwrap(),
        b"this is my file"
    );
}

#[test]
fn passphrase_must_be_the_only_recipient() {
    let recipient = scrypt::Recipient::new(SecretString::new("mypass1".to_owned()));
    let other = x25519::Identity::generate().to_public();

    assert!(matches!(
        kage::encrypt_to_file([&other as &dyn Recipient, &recipient], &b""[..]),
        Err(EncryptError::InvalidScryptRecipient)
    ));
}

#[test]
fn scrypt_stanza_must_be_alone_in_header() {
    let mut recipient = scrypt::Recipient::new(SecretString::new("mypass1".to_owned()));
    recipient.set_work_factor(2);
    let encrypted = kage::encrypt(&recipient, b"").unwrap();

    // Duplicate the scrypt stanza (a stanza line and its single body line).
    let start = line_offset(&encrypted, b"-> scrypt ", 0);
    let end = line_offset(&encrypted, b"--- ", 0);
    let mut doubled = encrypted[..end].to_vec();
    doubled.extend_from_slice(&encrypted[start..]);

    assert!(matches!(
        Decryptor::new(&doubled[..]),
        Err(DecryptError::InvalidScryptHeader)
    ));
}

#[test]
fn empty_recipients_and_identities() {
    assert!(matches!(
        kage::encrypt_stream(iter::empty(), &b""[..], vec![], false),
        Err(EncryptError::NoRecipients)
    ));

    let identity = x25519::Identity::generate();
    let encrypted = kage::encrypt(&identity.to_public(), b"").unwrap();
    assert!(matches!(
        decrypt_with(&[], &encrypted),
        Err(DecryptError::NoIdentities)
    ));
}
