use anyhow::Result;
use csv::Writer;
use std::io::Write;
use std::path::Path;

use crate::models::{MatchDecision, Verdict};

const HEADERS: [&str; 11] = [
    "a_source", "a_id", "b_source", "b_id", "pass", "block", "offset", "score", "verdict", "passed", "failed",
];

fn verdict_str(v: Verdict) -> &'static str {
    match v { Verdict::Match => "match", Verdict::NonMatch => "non_match" }
}

fn write_decision<W: Write>(w: &mut Writer<W>, d: &MatchDecision) -> Result<()> {
    let names = |passed: bool| -> String {
        d.outcomes.iter().filter(|o| o.passed == passed).map(|o| o.predicate.as_ref()).collect::<Vec<_>>().join(",")
    };
    w.write_record(&[
        d.a.source.to_string(),
        d.a.id.to_string(),
        d.b.source.to_string(),
        d.b.id.to_string(),
        d.provenance.pass.to_string(),
        d.provenance.block.to_string(),
        d.provenance.offset.to_string(),
        format!("{:.4}", d.score),
        verdict_str(d.verdict).to_string(),
        names(true),
        names(false),
    ])?;
    Ok(())
}

pub fn export_to_csv(decisions: &[MatchDecision], path: impl AsRef<Path>) -> Result<()> {
    let mut w = CsvDecisionWriter::create(path)?;
    for d in decisions { w.write(d)?; }
    w.flush()
}

/// Streaming sink for match decisions.
pub struct CsvDecisionWriter<W: Write = std::fs::File> {
    writer: Writer<W>,
    written: u64,
}

impl CsvDecisionWriter<std::fs::File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> { Self::from_writer(std::fs::File::create(path)?) }
}

impl<W: Write> CsvDecisionWriter<W> {
    pub fn from_writer(inner: W) -> Result<Self> {
        let mut writer = Writer::from_writer(inner);
        writer.write_record(HEADERS)?;
        Ok(Self { writer, written: 0 })
    }
    pub fn write(&mut self, d: &MatchDecision) -> Result<()> {
        write_decision(&mut self.writer, d)?;
        self.written += 1;
        Ok(())
    }
    pub fn written(&self) -> u64 { self.written }
    pub fn flush(mut self) -> Result<()> { self.writer.flush()?; Ok(()) }
}
