//! Core data models used throughout seqfeed.
//!
//! These types represent the objects, parse outcomes, and ledger rows that
//! flow through the reconciliation pipeline.

use chrono::{DateTime, Utc};

/// A single object as listed from the source bucket.
#[derive(Debug, Clone)]
pub struct SourceObject {
    /// Object key within the bucket.
    pub name: String,
    /// Object size in bytes.
    pub size: i64,
    /// Creation timestamp reported by the object store.
    pub created_at: DateTime<Utc>,
    /// Entity tag (content hash), stripped of surrounding quotes.
    pub content_hash: String,
}

/// One record parsed out of a FASTA payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// The identifier embedded in the record header (first token after `>`).
    pub id: String,
    /// The sequence body with line breaks and whitespace removed.
    pub sequence: String,
}

/// Classification of one payload, written to the ledger as text.
///
/// Parse failures are terminal: the payload itself is malformed and a retry
/// cannot change the outcome. `FailedFetch` is the one transient variant,
/// recorded when the object could not be read at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Success,
    FailedEmpty,
    FailedMultiRecord,
    FailedNoIdentity,
    FailedFetch,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Success => "Success",
            ParseStatus::FailedEmpty => "FailedEmpty",
            ParseStatus::FailedMultiRecord => "FailedMultiRecord",
            ParseStatus::FailedNoIdentity => "FailedNoIdentity",
            ParseStatus::FailedFetch => "FailedFetch",
        }
    }
}

impl std::fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row in the `load_attempts` table: the durable outcome of processing a
/// single candidate in a single pass.
///
/// Rows are append-only. Multiple rows may exist for the same identity (one
/// per attempt across restarts); the item is resolved once any row for the
/// same server/host pair carries `completed = true`.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub host_name: String,
    pub server_url: String,
    pub file_name: String,
    /// Identity derived from the file name. Candidates always have one.
    pub identity: String,
    /// The identifier embedded in the payload, when one was parsed.
    pub seqid: Option<String>,
    pub parse_status: ParseStatus,
    pub batch_start_time: DateTime<Utc>,
    /// Position of this item within the pass, zero-based.
    pub batch_sample_number: i64,
    /// Number of candidates in the pass.
    pub batch_size: i64,
    pub len_seq: Option<i64>,
    /// First 128 characters of the fetched payload, for audit.
    pub first_chars: Option<String>,
    pub bucket_read_start_time: DateTime<Utc>,
    pub bucket_read_end_time: DateTime<Utc>,
    pub insert_start_time: Option<DateTime<Utc>>,
    pub insert_end_time: Option<DateTime<Utc>>,
    /// HTTP status code returned by the neighbor server, when submission ran.
    pub insert_status_code: Option<i64>,
    /// True when the outcome is terminal and the identity must never be
    /// re-selected: accepted by the server, rejected with a client error, or
    /// failed a parse/identity check that a retry cannot fix.
    pub completed: bool,
}

/// One row in the `batch_checks` table, written once per reconciliation pass.
/// Purely observational; never read back by the algorithm.
#[derive(Debug, Clone)]
pub struct BatchCheckpoint {
    pub host_name: String,
    pub server_url: String,
    pub check_time: DateTime<Utc>,
    /// Candidates found by this pass.
    pub batch_size: i64,
    /// Size of the server's identity set at the start of the pass.
    pub number_in_server: i64,
}

/// Summary of one reconciliation pass.
///
/// `candidates == 0` means the pass was idle and the loop should sleep
/// before recomputing.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    /// Objects currently listed in the bucket (after glob filtering).
    pub listed: usize,
    /// Identities already held by the neighbor server.
    pub in_server: usize,
    /// Candidates selected for processing this pass.
    pub candidates: usize,
    /// Submissions accepted by the server (2xx).
    pub accepted: usize,
    /// Submissions the server answered with a terminal rejection (4xx,
    /// including "already exists").
    pub rejected: usize,
    /// Attempts recorded with a non-Success parse status.
    pub failed: usize,
    /// Attempts left incomplete (transient faults), eligible for retry.
    pub retryable: usize,
}
