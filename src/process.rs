use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use regex::Regex;

use crate::extract::{extract_accessory_filtered, extract_first, Patterns};
use crate::store::{self, ProcessedRecord, ProductRecord};

/// Promotional prefix some listings carry in front of the product name.
const NAME_PREFIX: &str = r"\[명품다올동래\]\s*";

pub struct ProcessStats {
    pub rows: usize,
    pub with_condition: usize,
    pub with_accessories: usize,
}

impl ProcessStats {
    pub fn print(&self) {
        println!(
            "Processed {} rows ({} with condition, {} with accessories).",
            self.rows, self.with_condition, self.with_accessories
        );
    }
}

/// Batch transform: read the raw checkpoint table, derive structured columns
/// from the description text, write the derived table. No row is dropped or
/// reordered; a pattern miss is an empty cell, never an error.
pub fn run(out_dir: &Path) -> Result<ProcessStats> {
    let raw_path = out_dir.join(store::RAW_FILE);
    let records = store::read_raw(&raw_path)
        .with_context(|| format!("read raw table {}", raw_path.display()))?;

    let patterns = Patterns::new()?;
    let processed = process_records(&records, &patterns)?;

    let out_path = out_dir.join(store::PROCESSED_FILE);
    store::write_rows(&out_path, &processed)?;
    println!("Derived table written to {}", out_path.display());

    Ok(ProcessStats {
        rows: processed.len(),
        with_condition: processed.iter().filter(|r| r.condition.is_some()).count(),
        with_accessories: processed.iter().filter(|r| r.accessories.is_some()).count(),
    })
}

pub fn process_records(
    records: &[ProductRecord],
    patterns: &Patterns,
) -> Result<Vec<ProcessedRecord>> {
    let prefix = Regex::new(NAME_PREFIX)?;

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    let mut out = Vec::with_capacity(records.len());
    for chunk in records.chunks(500) {
        let rows: Vec<ProcessedRecord> = chunk
            .par_iter()
            .map(|r| process_one(r, patterns, &prefix))
            .collect();
        pb.inc(chunk.len() as u64);
        out.extend(rows);
    }
    pb.finish_and_clear();

    Ok(out)
}

fn process_one(record: &ProductRecord, p: &Patterns, prefix: &Regex) -> ProcessedRecord {
    let description = record.description.as_deref();
    ProcessedRecord {
        rank: record.rank,
        page: record.page,
        name: prefix.replace_all(&record.name, "").to_string(),
        price: record.price.clone(),
        condition: extract_first(description, &p.condition),
        engraving: extract_first(description, &p.engraving),
        color: extract_first(description, &p.color),
        material: extract_first(description, &p.material),
        size: extract_first(description, &p.size),
        accessories: extract_accessory_filtered(description),
        purchased_at: extract_first(description, &p.purchase_ym),
        purchase_price: extract_first(description, &p.purchase_price),
    }
}

// ── Tests ──
