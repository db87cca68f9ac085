use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const RAW_FILE: &str = "raw_data.csv";
pub const PROCESSED_FILE: &str = "processed_data.csv";

/// The unit of persistence. Immutable once recorded; ranks are globally
/// unique and strictly increasing, so the rank-derived filenames are too.
/// CSV headers match the original export format of the storefront dumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(rename = "순위")]
    pub rank: u32,
    #[serde(rename = "페이지")]
    pub page: u32,
    #[serde(rename = "상품명")]
    pub name: String,
    #[serde(rename = "가격")]
    pub price: Option<String>,
    #[serde(rename = "상품 상세")]
    pub description: Option<String>,
    #[serde(rename = "썸네일 이미지 파일명")]
    pub thumbnail_file: String,
    #[serde(
        rename = "상세 이미지 파일명",
        serialize_with = "join_files",
        deserialize_with = "split_files"
    )]
    pub detail_files: Vec<String>,
}

impl ProductRecord {
    pub fn new(rank: u32, page: u32, name: String) -> Self {
        Self {
            rank,
            page,
            name,
            price: None,
            description: None,
            thumbnail_file: format!("{rank}.jpg"),
            detail_files: Vec::new(),
        }
    }
}

/// Derived row produced by the post-processor; raw columns plus the
/// structured fields pulled out of the description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub rank: u32,
    pub page: u32,
    #[serde(rename = "상품명")]
    pub name: String,
    #[serde(rename = "판매가")]
    pub price: Option<String>,
    #[serde(rename = "상태")]
    pub condition: Option<String>,
    #[serde(rename = "각인")]
    pub engraving: Option<String>,
    #[serde(rename = "색상")]
    pub color: Option<String>,
    #[serde(rename = "소재")]
    pub material: Option<String>,
    #[serde(rename = "사이즈")]
    pub size: Option<String>,
    #[serde(rename = "부속품")]
    pub accessories: Option<String>,
    #[serde(rename = "구입시기")]
    pub purchased_at: Option<String>,
    #[serde(rename = "구입가")]
    pub purchase_price: Option<String>,
}

/// The list-valued column is serialized as one `;`-delimited cell.
fn join_files<S: Serializer>(files: &[String], ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&files.join(";"))
}

fn split_files<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    let joined = String::deserialize(de)?;
    Ok(joined
        .split(';')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Durable checkpoint sink. Full-rewrite semantics: every flush supersedes
/// the previous file wholesale, so the output is always a complete snapshot
/// as of the last flush (an append-log strategy can be swapped in here).
pub trait Checkpointer {
    fn flush(&self, records: &[ProductRecord]) -> Result<()>;
}

pub struct CsvCheckpointer {
    path: PathBuf,
}

impl CsvCheckpointer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Checkpointer for CsvCheckpointer {
    fn flush(&self, records: &[ProductRecord]) -> Result<()> {
        write_rows(&self.path, records)
    }
}

/// Overwrite `path` with a BOM-prefixed UTF-8 CSV of `rows`. The BOM keeps
/// spreadsheet tools from mangling the Korean headers.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("create {}", path.display()))?;
    file.write_all(b"\xef\xbb\xbf")?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_raw(path: &Path) -> Result<Vec<ProductRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rank: u32) -> ProductRecord {
        let mut r = ProductRecord::new(rank, 1, format!("item {rank}"));
        r.price = Some("1,000원".into());
        r.description = Some("상태 / 양호\n사이즈 / 38".into());
        r.detail_files = vec![format!("{rank}_1.jpg"), format!("{rank}_2.jpg")];
        r
    }

    #[test]
    fn filenames_derive_from_rank() {
        let r = ProductRecord::new(12, 2, "x".into());
        assert_eq!(r.thumbnail_file, "12.jpg");
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RAW_FILE);
        write_rows(&path, &[record(1), record(2)]).unwrap();

        let back = read_raw(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].rank, 1);
        assert_eq!(back[0].detail_files, vec!["1_1.jpg", "1_2.jpg"]);
        assert_eq!(back[1].description.as_deref(), Some("상태 / 양호\n사이즈 / 38"));
    }

    #[test]
    fn file_starts_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RAW_FILE);
        write_rows(&path, &[record(1)]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"\xef\xbb\xbf"));
    }

    #[test]
    fn flush_is_full_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CsvCheckpointer::new(dir.path().join(RAW_FILE));

        ckpt.flush(&[record(1), record(2), record(3)]).unwrap();
        // A later, shorter flush fully supersedes the earlier file.
        ckpt.flush(&[record(1)]).unwrap();

        let back = read_raw(ckpt.path()).unwrap();
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn empty_detail_list_roundtrips_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RAW_FILE);
        write_rows(&path, &[ProductRecord::new(1, 1, "x".into())]).unwrap();
        let back = read_raw(&path).unwrap();
        assert!(back[0].detail_files.is_empty());
        assert_eq!(back[0].price, None);
    }
}
