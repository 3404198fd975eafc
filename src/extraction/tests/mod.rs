use crate::error::ConvertError;
use crate::extraction::*;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a valid ZIP archive containing the given files
fn create_zip_archive(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Deflated);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content).unwrap();
    }
    writer.finish().unwrap();
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Single stored entry whose central directory claims a ZIP64 uncompressed
/// size of `declared_size`, far from the `content.len()` bytes actually stored
pub(crate) fn zip_with_declared_size(name: &str, content: &[u8], declared_size: u64) -> Vec<u8> {
    let name = name.as_bytes();
    let crc = crc32(content);
    let stored = content.len() as u32;
    let mut out = Vec::new();

    // Local file header
    out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    out.extend_from_slice(&20u16.to_le_bytes()); // version needed
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&0u16.to_le_bytes()); // stored
    out.extend_from_slice(&0u16.to_le_bytes()); // time
    out.extend_from_slice(&0x21u16.to_le_bytes()); // 1980-01-01
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&stored.to_le_bytes());
    out.extend_from_slice(&stored.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(content);

    // Central directory with a ZIP64 extra field
    let central_start = out.len() as u32;
    out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes()); // version made by
    out.extend_from_slice(&45u16.to_le_bytes()); // version needed
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0x21u16.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&stored.to_le_bytes());
    out.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // size lives in the extra field
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&12u16.to_le_bytes()); // extra field length
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length
    out.extend_from_slice(&0u16.to_le_bytes()); // disk
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // external attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
    out.extend_from_slice(name);
    out.extend_from_slice(&0x0001u16.to_le_bytes());
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(&declared_size.to_le_bytes());
    let central_size = out.len() as u32 - central_start;

    // End of central directory
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&central_size.to_le_bytes());
    out.extend_from_slice(&central_start.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

#[test]
fn test_extract_writes_every_entry() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("tblT001100S5339.zip");
    create_zip_archive(
        &archive,
        &[
            ("tblT001100S5339.txt", b"KEY_CODE,T001100001\r\n53394500,12\r\n"),
            ("readme.txt", b"notes"),
        ],
    );
    let dest = dir.path().join("txt_origin");

    let files = extract(&archive, &dest).unwrap();

    assert_eq!(
        files,
        vec![dest.join("tblT001100S5339.txt"), dest.join("readme.txt")]
    );
    assert_eq!(
        std::fs::read(dest.join("tblT001100S5339.txt")).unwrap(),
        b"KEY_CODE,T001100001\r\n53394500,12\r\n"
    );
}

#[test]
fn test_extract_keeps_nested_directories() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("nested.zip");
    create_zip_archive(&archive, &[("sub/inner.txt", b"x")]);
    let dest = dir.path().join("out");

    let files = extract(&archive, &dest).unwrap();

    assert_eq!(files, vec![dest.join("sub").join("inner.txt")]);
    assert!(dest.join("sub").join("inner.txt").is_file());
}

#[test]
fn test_extract_skips_unsafe_paths() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("evil.zip");
    create_zip_archive(&archive, &[("../escape.txt", b"x"), ("ok.txt", b"y")]);
    let dest = dir.path().join("out");

    let files = extract(&archive, &dest).unwrap();

    assert_eq!(files, vec![dest.join("ok.txt")]);
    assert!(!dir.path().join("escape.txt").exists());
}

#[test]
fn test_corrupt_archive_is_reported() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.zip");
    std::fs::write(&archive, b"this is not a zip file").unwrap();

    let err = extract(&archive, &dir.path().join("out")).unwrap_err();

    match err {
        ConvertError::CorruptArchive { archive: reported, .. } => assert_eq!(reported, archive),
        other => panic!("expected CorruptArchive, got {other:?}"),
    }
}

#[test]
fn test_missing_archive_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = extract(&dir.path().join("absent.zip"), &dir.path().join("out")).unwrap_err();
    assert_eq!(err.error_code(), "io_error");
}

#[test]
fn test_detect_zip_files() {
    let dir = TempDir::new().unwrap();
    create_zip_archive(&dir.path().join("b.zip"), &[("b.txt", b"")]);
    create_zip_archive(&dir.path().join("a.ZIP"), &[("a.txt", b"")]);
    std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

    let archives = ZipExtractor::detect_zip_files(dir.path()).unwrap();

    assert_eq!(
        archives,
        vec![dir.path().join("a.ZIP"), dir.path().join("b.zip")]
    );
}

#[test]
fn test_entry_declaring_huge_size_extracts_real_content() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("tblT001100S5339.zip");
    std::fs::write(
        &archive,
        zip_with_declared_size("tblT001100S5339.txt", b"KEY_CODE\r\n53394500\r\n", 1 << 46),
    )
    .unwrap();
    let dest = dir.path().join("out");

    let files = extract(&archive, &dest).unwrap();

    assert_eq!(files, vec![dest.join("tblT001100S5339.txt")]);
    assert_eq!(
        std::fs::read(dest.join("tblT001100S5339.txt")).unwrap(),
        b"KEY_CODE\r\n53394500\r\n"
    );
}

#[test]
fn test_entry_with_bad_checksum_is_corrupt_and_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("bad_crc.zip");
    let mut bytes = zip_with_declared_size("t.txt", b"abc", 3);
    // Flip the data so it no longer matches the recorded CRC
    let data_at = 30 + "t.txt".len();
    bytes[data_at] ^= 0xFF;
    std::fs::write(&archive, bytes).unwrap();
    let dest = dir.path().join("out");

    let err = extract(&archive, &dest).unwrap_err();

    assert_eq!(err.error_code(), "corrupt_archive");
    assert!(!dest.join("t.txt").exists());
}

