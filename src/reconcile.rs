//! Reconciliation core: candidate selection, the per-item state machine,
//! and the unbounded poll loop.
//!
//! Each pass diffs three identity sets — the bucket listing `S`, the
//! server's holdings `R`, and the ledger's terminally-resolved set `L` —
//! and drives every candidate in `S − R − L` through fetch → parse →
//! cross-check → submit, appending exactly one ledger row per candidate
//! before moving to the next. Crash recovery needs nothing beyond that:
//! a restart recomputes the candidate set from scratch and the ledger's
//! `completed` flags make terminal outcomes absorbing.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::fasta::{parse_fasta, ParseOutcome};
use crate::identity::extract_identity;
use crate::ledger::Ledger;
use crate::models::{
    AttemptRecord, BatchCheckpoint, ParseStatus, PassSummary, SourceObject,
};
use crate::traits::{ObjectSource, SequenceServer};

/// Compute `S − R − L`: identities listed at the source, minus those the
/// server already holds, minus those the ledger marks terminally resolved.
pub fn candidate_identities(
    source: &HashSet<String>,
    in_server: &HashSet<String>,
    completed: &HashSet<String>,
) -> HashSet<String> {
    source
        .iter()
        .filter(|id| !in_server.contains(*id) && !completed.contains(*id))
        .cloned()
        .collect()
}

pub struct Reconciler<'a> {
    source: &'a dyn ObjectSource,
    server: &'a dyn SequenceServer,
    ledger: &'a Ledger,
    /// Target identity for ledger rows, i.e. the server base URL.
    server_url: String,
    /// Host identity for ledger rows.
    host_name: String,
    identity_tag: String,
    idle: Duration,
}

/// The work selected for one pass, in source listing order (ascending
/// creation time).
struct SelectedWork {
    listed: usize,
    in_server: usize,
    candidates: Vec<(String, SourceObject)>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        source: &'a dyn ObjectSource,
        server: &'a dyn SequenceServer,
        ledger: &'a Ledger,
        server_url: impl Into<String>,
        host_name: impl Into<String>,
        identity_tag: impl Into<String>,
        idle: Duration,
    ) -> Self {
        Self {
            source,
            server,
            ledger,
            server_url: server_url.into(),
            host_name: host_name.into(),
            identity_tag: identity_tag.into(),
            idle,
        }
    }

    /// List the bucket and server and compute the candidate set, without
    /// touching payloads or the ledger. `None` means the bucket listing was
    /// empty (the explicit "nothing to do" signal).
    async fn select_candidates(&self) -> Result<Option<SelectedWork>> {
        let objects = self.source.list().await?;
        if objects.is_empty() {
            return Ok(None);
        }

        let in_server = self.server.identities().await?;
        info!(
            listed = objects.len(),
            in_server = in_server.len(),
            "listed source and server"
        );

        // Objects without a valid identity are dropped here and never
        // become candidates. Two objects deriving the same identity are the
        // same unit of work; the earliest listing wins.
        let mut source_ids: HashSet<String> = HashSet::new();
        let mut named: Vec<(String, SourceObject)> = Vec::new();
        for obj in objects.iter() {
            let Some(identity) = extract_identity(&self.identity_tag, &obj.name) else {
                continue;
            };
            if source_ids.insert(identity.clone()) {
                named.push((identity, obj.clone()));
            }
        }

        let completed = self
            .ledger
            .completed_identities(&self.server_url, &self.host_name)
            .await?;

        let wanted = candidate_identities(&source_ids, &in_server, &completed);
        let candidates: Vec<(String, SourceObject)> = named
            .into_iter()
            .filter(|(id, _)| wanted.contains(id))
            .collect();

        Ok(Some(SelectedWork {
            listed: objects.len(),
            in_server: in_server.len(),
            candidates,
        }))
    }

    /// Compute the candidate set and report it without processing anything.
    /// No ledger writes.
    pub async fn preview_pass(&self) -> Result<PassSummary> {
        let Some(work) = self.select_candidates().await? else {
            return Ok(PassSummary::default());
        };

        Ok(PassSummary {
            listed: work.listed,
            in_server: work.in_server,
            candidates: work.candidates.len(),
            ..Default::default()
        })
    }

    /// Run one full reconciliation pass: select candidates, process each
    /// through the state machine, record one attempt row per candidate, and
    /// finish with one batch checkpoint.
    pub async fn run_pass(&self, limit: Option<usize>) -> Result<PassSummary> {
        let Some(mut work) = self.select_candidates().await? else {
            info!("bucket is empty, nothing to reconcile");
            return Ok(PassSummary::default());
        };

        if let Some(lim) = limit {
            work.candidates.truncate(lim);
        }

        let batch_start_time = Utc::now();
        let batch_size = work.candidates.len();
        info!(candidates = batch_size, "selected candidates");

        let mut summary = PassSummary {
            listed: work.listed,
            in_server: work.in_server,
            candidates: batch_size,
            ..Default::default()
        };

        for (i, (identity, obj)) in work.candidates.iter().enumerate() {
            let mut attempt = AttemptRecord {
                host_name: self.host_name.clone(),
                server_url: self.server_url.clone(),
                file_name: obj.name.clone(),
                identity: identity.clone(),
                seqid: None,
                parse_status: ParseStatus::FailedFetch,
                batch_start_time,
                batch_sample_number: i as i64,
                batch_size: batch_size as i64,
                len_seq: None,
                first_chars: None,
                bucket_read_start_time: Utc::now(),
                bucket_read_end_time: Utc::now(),
                insert_start_time: None,
                insert_end_time: None,
                insert_status_code: None,
                completed: false,
            };

            match self.source.fetch(&obj.name).await {
                Ok(text) => {
                    attempt.bucket_read_end_time = Utc::now();
                    attempt.first_chars = Some(text.chars().take(128).collect());
                    self.classify_and_submit(identity, &text, &mut attempt).await;
                }
                Err(e) => {
                    // Transient: the object stays a candidate next pass.
                    attempt.bucket_read_end_time = Utc::now();
                    warn!(file = %obj.name, error = %e, "bucket read failed");
                }
            }

            match attempt.parse_status {
                ParseStatus::Success => {}
                _ => summary.failed += 1,
            }
            if attempt.completed {
                match attempt.insert_status_code {
                    Some(code) if (200..300).contains(&code) => summary.accepted += 1,
                    Some(_) => summary.rejected += 1,
                    None => {}
                }
            } else {
                summary.retryable += 1;
            }

            info!(
                sample = i,
                identity = %identity,
                status = %attempt.parse_status,
                code = ?attempt.insert_status_code,
                completed = attempt.completed,
                "recording attempt"
            );
            self.ledger.record_attempt(&attempt).await?;
        }

        self.ledger
            .record_batch(&BatchCheckpoint {
                host_name: self.host_name.clone(),
                server_url: self.server_url.clone(),
                check_time: Utc::now(),
                batch_size: batch_size as i64,
                number_in_server: work.in_server as i64,
            })
            .await?;

        Ok(summary)
    }

    /// Fetch succeeded: classify the payload, cross-check its embedded id,
    /// and submit when and only when everything lines up. Fills in the
    /// attempt row accordingly.
    async fn classify_and_submit(&self, identity: &str, text: &str, attempt: &mut AttemptRecord) {
        match parse_fasta(text) {
            ParseOutcome::Empty => {
                attempt.parse_status = ParseStatus::FailedEmpty;
                attempt.completed = true;
            }
            ParseOutcome::Multi(n) => {
                attempt.parse_status = ParseStatus::FailedMultiRecord;
                attempt.completed = true;
                warn!(file = %attempt.file_name, records = n, "multi-record payload refused");
            }
            ParseOutcome::Single(record) => {
                attempt.seqid = Some(record.id.clone());
                attempt.len_seq = Some(record.sequence.len() as i64);

                // The payload's own id must carry the tag and derive the
                // same identity as the file name; a mismatch is terminal.
                match extract_identity(&self.identity_tag, &record.id) {
                    Some(ref embedded) if embedded == identity => {
                        attempt.parse_status = ParseStatus::Success;
                        attempt.insert_start_time = Some(Utc::now());
                        match self.server.submit(identity, &record.sequence).await {
                            Ok(code) => {
                                attempt.insert_end_time = Some(Utc::now());
                                attempt.insert_status_code = Some(code as i64);
                                // Anything below the server-fault range is
                                // terminal, including 4xx rejections.
                                attempt.completed = code < 500;
                                if code >= 500 {
                                    warn!(identity = %identity, code, "server fault, will retry");
                                }
                            }
                            Err(e) => {
                                attempt.insert_end_time = Some(Utc::now());
                                warn!(identity = %identity, error = %e, "submission transport failure, will retry");
                            }
                        }
                    }
                    _ => {
                        attempt.parse_status = ParseStatus::FailedNoIdentity;
                        attempt.completed = true;
                        warn!(
                            file = %attempt.file_name,
                            seqid = %record.id,
                            "embedded record id does not match file identity"
                        );
                    }
                }
            }
        }
    }

    /// Poll forever: drain greedily while passes find work, sleep the idle
    /// interval when one finds none, and never stop on a recoverable fault.
    pub async fn run_forever(&self) -> Result<()> {
        loop {
            match self.run_pass(None).await {
                Ok(summary) => {
                    info!(
                        candidates = summary.candidates,
                        accepted = summary.accepted,
                        failed = summary.failed,
                        retryable = summary.retryable,
                        "pass complete"
                    );
                    if summary.candidates == 0 {
                        tokio::time::sleep(self.idle).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "pass aborted, will retry after idle interval");
                    tokio::time::sleep(self.idle).await;
                }
            }
        }
    }
}
