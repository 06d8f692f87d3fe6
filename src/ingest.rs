//! CSV ingestion into typed records.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::io::Read;
use std::path::Path;

use crate::config::{FieldType, IngestConfig};
use crate::models::{Record, RecordId, RecordStore, Value};

/// Per-file ingestion tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub rows: u64,
    /// Empty cells, left out of the record.
    pub empty_cells: u64,
    /// Cells that did not parse as their declared type, left out of the record.
    pub invalid_cells: u64,
}

fn parse_cell(raw: &str, ty: FieldType, date_format: &str) -> Option<Value> {
    match ty {
        FieldType::Text => Some(Value::Text(raw.to_string())),
        FieldType::Number => raw.parse::<f64>().ok().filter(|n| n.is_finite()).map(Value::Number),
        FieldType::Date => NaiveDate::parse_from_str(raw, date_format).ok().map(Value::Date),
    }
}

/// Reads one CSV source. Every column except the id column becomes a field;
/// the id column must hold an integer unique within the file.
pub fn read_records<R: Read>(reader: R, source: u16, cfg: &IngestConfig) -> Result<(Vec<Record>, IngestStats)> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers().context("reading CSV header")?.clone();
    let id_pos = headers
        .iter()
        .position(|h| h == cfg.id_column)
        .with_context(|| format!("id column '{}' not found in header", cfg.id_column))?;

    let mut stats = IngestStats::default();
    let mut records = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let line = row + 2;
        let rec = result.with_context(|| format!("reading CSV row {}", line))?;
        let raw_id = rec.get(id_pos).unwrap_or("");
        let id: i64 = raw_id.parse().with_context(|| format!("row {}: invalid id {:?}", line, raw_id))?;
        let mut fields = Vec::with_capacity(headers.len().saturating_sub(1));
        for (i, name) in headers.iter().enumerate() {
            if i == id_pos { continue; }
            let cell = rec.get(i).unwrap_or("");
            if cell.is_empty() {
                stats.empty_cells += 1;
                continue;
            }
            let ty = cfg.field_types.get(name).copied().unwrap_or(FieldType::Text);
            match parse_cell(cell, ty, &cfg.date_format) {
                Some(v) => fields.push((name.to_string(), v)),
                None => {
                    stats.invalid_cells += 1;
                    log::debug!("row {}: {:?} is not a valid {:?} for '{}'", line, cell, ty, name);
                }
            }
        }
        records.push(Record::new(RecordId::new(source, id), fields));
        stats.rows += 1;
    }
    Ok((records, stats))
}

pub fn read_csv(path: &Path, source: u16, cfg: &IngestConfig) -> Result<(Vec<Record>, IngestStats)> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_records(file, source, cfg).with_context(|| format!("ingesting {}", path.display()))
}

/// Loads each file as its own source (tagged by position) into one store.
pub fn load_store<P: AsRef<Path>>(paths: &[P], cfg: &IngestConfig) -> Result<RecordStore> {
    let mut all = Vec::new();
    for (source, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        let source = u16::try_from(source).context("too many input sources")?;
        let (records, stats) = read_csv(path, source, cfg)?;
        log::info!(
            "Loaded {} rows from {} as source {} ({} empty cells, {} invalid cells)",
            stats.rows, path.display(), source, stats.empty_cells, stats.invalid_cells
        );
        if stats.invalid_cells > 0 {
            log::warn!("{}: {} cells did not parse as their declared type and were treated as missing", path.display(), stats.invalid_cells);
        }
        all.extend(records);
    }
    Ok(RecordStore::from_records(all)?)
}
