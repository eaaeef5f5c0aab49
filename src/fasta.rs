//! FASTA payload classification.
//!
//! The pipeline submits exactly one logical sequence per call to the
//! neighbor server, so a payload is only usable when it contains exactly one
//! record. Parsing fully classifies the payload in one shot; there is no
//! streaming interface and no partial state.

use crate::models::FastaRecord;

/// Result of classifying one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// No records found.
    Empty,
    /// Exactly one record: the only outcome eligible for submission.
    Single(FastaRecord),
    /// Two or more records; multi-record payloads are refused outright.
    Multi(usize),
}

/// Classify a FASTA payload.
///
/// A record starts at a line beginning with `>`; its id is the first
/// whitespace-delimited token after the `>`, and its sequence is every
/// following line up to the next header, concatenated with whitespace
/// removed. Text before the first header is ignored.
pub fn parse_fasta(text: &str) -> ParseOutcome {
    let mut records: Vec<FastaRecord> = Vec::new();

    for line in text.lines() {
        if let Some(header) = line.strip_prefix('>') {
            // A second record makes the payload unusable, but we keep
            // counting so the refusal can report how many there were.
            let id = header
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            records.push(FastaRecord {
                id,
                sequence: String::new(),
            });
        } else if let Some(current) = records.last_mut() {
            for part in line.split_whitespace() {
                current.sequence.push_str(part);
            }
        }
    }

    match records.len() {
        0 => ParseOutcome::Empty,
        1 => ParseOutcome::Single(records.into_iter().next().unwrap()),
        n => ParseOutcome::Multi(n),
    }
}
