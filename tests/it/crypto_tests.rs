//! Encrypted entries: traditional PKWARE keystream via the `$password`
//! path suffix, and WinZip AES under the built-in password.

use crate::fixture::ZipBuilder;
use rstest::rstest;
use std::io::Cursor;
use zipfs::{ErrorKind, ZipArchive, BUILT_IN_AES_PASSWORD};

fn open(data: Vec<u8>) -> ZipArchive<Cursor<Vec<u8>>> {
    ZipArchive::open(Cursor::new(data), false).unwrap()
}

fn secret_archive(deflated: bool) -> ZipArchive<Cursor<Vec<u8>>> {
    open(
        ZipBuilder::new()
            .traditional("secret.bin", b"the cake is a lie", "hunter2", deflated)
            .stored("readme.txt", b"public")
            .build(),
    )
}

#[test]
fn test_traditional_decrypts_with_suffix_password() {
    let mut archive = secret_archive(false);
    let mut reader = archive.open_read("secret.bin$hunter2").unwrap();

    let mut buf = [0u8; 64];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"the cake is a lie");
}

#[test]
fn test_traditional_wrong_password() {
    let mut archive = secret_archive(false);
    let err = archive.open_read("secret.bin$wrongpw").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::BadPassword));
}

#[test]
fn test_traditional_missing_password() {
    let mut archive = secret_archive(false);
    let err = archive.open_read("secret.bin").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::BadPassword));
}

#[test]
fn test_password_for_plain_entry_rejected() {
    let mut archive = secret_archive(false);
    let err = archive.open_read("readme.txt$hunter2").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::BadPassword));
}

#[test]
fn test_password_split_is_at_last_dollar() {
    // the entry name itself contains a '$'; only the last one starts the
    // password
    let mut archive = open(
        ZipBuilder::new()
            .traditional("pri$ce.txt", b"42", "pw", false)
            .build(),
    );

    let mut reader = archive.open_read("pri$ce.txt$pw").unwrap();
    let mut buf = [0u8; 8];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"42");
}

#[test]
fn test_traditional_deflated_roundtrip_and_rewind() {
    let content: Vec<u8> = (0..6000).map(|i| ((i * 7) % 251) as u8).collect();
    let mut archive = open(
        ZipBuilder::new()
            .traditional("data.bin", &content, "tok3n", true)
            .build(),
    );

    let mut reader = archive.open_read("data.bin$tok3n").unwrap();
    let mut out = vec![0u8; content.len()];
    assert_eq!(reader.read(&mut out).unwrap(), content.len());
    assert_eq!(out, content);

    // backward seek restores the initial keys and replays
    reader.seek(100).unwrap();
    let mut buf = [0u8; 50];
    assert_eq!(reader.read(&mut buf).unwrap(), 50);
    assert_eq!(&buf[..], &content[100..150]);
}

#[test]
fn test_traditional_stored_backward_seek_replays() {
    let content: Vec<u8> = (0..3000).map(|i| (i % 256) as u8).collect();
    let mut archive = open(
        ZipBuilder::new()
            .traditional("data.bin", &content, "pw", false)
            .build(),
    );

    let mut reader = archive.open_read("data.bin$pw").unwrap();
    reader.seek(2000).unwrap();
    reader.seek(500).unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(reader.read(&mut buf).unwrap(), 64);
    assert_eq!(&buf[..], &content[500..564]);
}

#[test]
fn test_traditional_duplicate_matches_from_start() {
    let content = b"identical for every duplicate".to_vec();
    let mut archive = open(
        ZipBuilder::new()
            .traditional("d.bin", &content, "pw", false)
            .build(),
    );

    let mut reader = archive.open_read("d.bin$pw").unwrap();
    let mut skip = [0u8; 10];
    reader.read(&mut skip).unwrap();

    let mut dup = reader.duplicate();
    let mut out = vec![0u8; content.len()];
    assert_eq!(dup.read(&mut out).unwrap(), content.len());
    assert_eq!(out, content);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_aes_roundtrip_all_strengths(#[case] strength_tag: u8) {
    let content: Vec<u8> = (0..2500).map(|i| ((i * 13) % 241) as u8).collect();
    let mut archive = open(
        ZipBuilder::new()
            .aes("vault.dat", &content, strength_tag, BUILT_IN_AES_PASSWORD)
            .build(),
    );

    // AES entries need no password suffix; the password is built in
    let mut reader = archive.open_read("vault.dat").unwrap();
    assert_eq!(reader.len(), content.len() as u64);

    let mut out = vec![0u8; content.len()];
    assert_eq!(reader.read(&mut out).unwrap(), content.len());
    assert_eq!(out, content);
}

#[test]
fn test_aes_seek_to_middle() {
    let content: Vec<u8> = (0..4096).map(|i| ((i * 31) % 253) as u8).collect();
    let mut archive = open(
        ZipBuilder::new()
            .aes("vault.dat", &content, 3, BUILT_IN_AES_PASSWORD)
            .build(),
    );

    let mut reader = archive.open_read("vault.dat").unwrap();
    reader.seek(2048).unwrap();
    let mut buf = [0u8; 100];
    assert_eq!(reader.read(&mut buf).unwrap(), 100);
    assert_eq!(&buf[..], &content[2048..2148]);
}

#[rstest]
#[case(1000, 17)]
#[case(17, 1000)]
#[case(16, 16)]
#[case(0, 4000)]
fn test_aes_seek_history_is_irrelevant(#[case] first: u64, #[case] second: u64) {
    let content: Vec<u8> = (0..4096).map(|i| ((i * 31) % 253) as u8).collect();
    let data = ZipBuilder::new()
        .aes("vault.dat", &content, 3, BUILT_IN_AES_PASSWORD)
        .build();

    let mut archive = open(data.clone());
    let mut reader = archive.open_read("vault.dat").unwrap();
    reader.seek(first).unwrap();
    reader.seek(second).unwrap();
    let mut with_detour = [0u8; 64];
    let n = reader.read(&mut with_detour).unwrap();

    let mut archive = open(data);
    let mut reader = archive.open_read("vault.dat").unwrap();
    reader.seek(second).unwrap();
    let mut direct = [0u8; 64];
    assert_eq!(reader.read(&mut direct).unwrap(), n);

    assert_eq!(with_detour[..n], direct[..n]);
}

#[test]
fn test_aes_wrong_archive_password_is_corrupt() {
    // an archive encrypted with some other deployment's password cannot
    // verify against the built-in one
    let mut archive = open(
        ZipBuilder::new()
            .aes("vault.dat", b"data", 3, "not-the-built-in-password")
            .build(),
    );
    let err = archive.open_read("vault.dat").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Corrupt(_)));
}

#[test]
fn test_aes_duplicate_matches_from_start() {
    let content: Vec<u8> = (0..1024).map(|i| (i % 250) as u8).collect();
    let mut archive = open(
        ZipBuilder::new()
            .aes("vault.dat", &content, 2, BUILT_IN_AES_PASSWORD)
            .build(),
    );

    let mut reader = archive.open_read("vault.dat").unwrap();
    reader.seek(777).unwrap();
    let mut dup = reader.duplicate();

    let mut out = vec![0u8; content.len()];
    assert_eq!(dup.read(&mut out).unwrap(), content.len());
    assert_eq!(out, content);
}

#[test]
fn test_broken_entry_stays_broken() {
    // corrupt the local header signature of an encrypted entry: the first
    // open breaks it, later opens fail fast
    let mut data = ZipBuilder::new()
        .traditional("secret.bin", b"payload", "pw", false)
        .build();
    data[0] = 0xFF;

    let mut archive = ZipArchive::open(Cursor::new(data), false).unwrap();
    assert!(archive.open_read("secret.bin$pw").is_err());
    let err = archive.open_read("secret.bin$pw").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Corrupt(_)));
}
