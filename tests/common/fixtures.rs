//! On-disk fixtures shaped like real catalog downloads

use encoding_rs::SHIFT_JIS;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header and two rows of a mesh table, as published
pub const MESH_TABLE: &str = "KEY_CODE,HTKSYORI,HTKSAKI,GASSAN,T001100001\r\n\
                              ,,,,人口（総数）\r\n\
                              53394500,0,,,128\r\n";

/// Encode `text` the way the catalog serves its tables
pub fn sjis(text: &str) -> Vec<u8> {
    let (bytes, _, unmappable) = SHIFT_JIS.encode(text);
    assert!(!unmappable, "fixture text must be representable in Shift_JIS");
    bytes.into_owned()
}

/// Write a ZIP archive holding `entries`
pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

/// Lay out `<dataset_dir>/<year>/zip/` with one single-table archive per mesh code
pub fn year_with_mesh_archives(dataset_dir: &Path, year: &str, meshes: &[&str]) -> PathBuf {
    let year_dir = dataset_dir.join(year);
    let zip_dir = year_dir.join("zip");
    std::fs::create_dir_all(&zip_dir).unwrap();
    for mesh in meshes {
        let stem = format!("tblT001100S{mesh}");
        write_zip(
            &zip_dir.join(format!("{stem}.zip")),
            &[(format!("{stem}.txt").as_str(), sjis(MESH_TABLE))],
        );
    }
    year_dir
}

/// Read a converted table, asserting the BOM and returning the text after it
pub fn read_csv(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(&bytes[..3], estat_harvest::transcode::UTF8_BOM, "missing BOM");
    String::from_utf8(bytes[3..].to_vec()).unwrap()
}
