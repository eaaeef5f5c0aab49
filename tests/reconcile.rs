//! End-to-end reconciliation tests against in-memory fakes of the bucket
//! and the neighbor server, with a real SQLite ledger.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use seqfeed::ledger::Ledger;
use seqfeed::models::SourceObject;
use seqfeed::reconcile::Reconciler;
use seqfeed::traits::{ObjectSource, SequenceServer};

const SERVER_URL: &str = "http://localhost:5025";
const HOST: &str = "testhost";
const TAG: &str = "SEQ";

/// In-memory bucket: named objects with payloads, and a set of names whose
/// fetch fails.
struct FakeBucket {
    objects: Vec<(String, String)>,
    broken: HashSet<String>,
}

impl FakeBucket {
    fn new(objects: &[(&str, &str)]) -> Self {
        Self {
            objects: objects
                .iter()
                .map(|(n, c)| (n.to_string(), c.to_string()))
                .collect(),
            broken: HashSet::new(),
        }
    }
}

#[async_trait]
impl ObjectSource for FakeBucket {
    async fn list(&self) -> Result<Vec<SourceObject>> {
        let base = Utc::now() - ChronoDuration::hours(1);
        Ok(self
            .objects
            .iter()
            .enumerate()
            .map(|(i, (name, content))| SourceObject {
                name: name.clone(),
                size: content.len() as i64,
                created_at: base + ChronoDuration::seconds(i as i64),
                content_hash: format!("etag-{}", i),
            })
            .collect())
    }

    async fn fetch(&self, name: &str) -> Result<String> {
        if self.broken.contains(name) {
            bail!("connection reset while reading '{}'", name);
        }
        match self.objects.iter().find(|(n, _)| n == name) {
            Some((_, content)) => Ok(content.clone()),
            None => bail!("object '{}' not found", name),
        }
    }
}

/// In-memory neighbor server: a held-identity set, a per-identity response
/// override, and a log of submit calls.
struct FakeServer {
    held: Mutex<HashSet<String>>,
    responses: HashMap<String, u16>,
    transport_broken: bool,
    submits: Mutex<Vec<String>>,
}

impl FakeServer {
    fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            responses: HashMap::new(),
            transport_broken: false,
            submits: Mutex::new(Vec::new()),
        }
    }

    fn submit_count(&self, identity: &str) -> usize {
        self.submits
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == identity)
            .count()
    }
}

#[async_trait]
impl SequenceServer for FakeServer {
    async fn identities(&self) -> Result<HashSet<String>> {
        Ok(self.held.lock().unwrap().clone())
    }

    async fn submit(&self, identity: &str, _sequence: &str) -> Result<u16> {
        self.submits.lock().unwrap().push(identity.to_string());
        if self.transport_broken {
            bail!("connection refused");
        }
        let code = *self.responses.get(identity).unwrap_or(&200);
        if (200..300).contains(&code) {
            self.held.lock().unwrap().insert(identity.to_string());
        }
        Ok(code)
    }
}

fn reconciler<'a>(
    bucket: &'a FakeBucket,
    server: &'a FakeServer,
    ledger: &'a Ledger,
) -> Reconciler<'a> {
    Reconciler::new(
        bucket,
        server,
        ledger,
        SERVER_URL,
        HOST,
        TAG,
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn mixed_pass_then_idle() {
    // A: valid single record. B: multi-record. C: embedded id mismatch.
    let bucket = FakeBucket::new(&[
        ("SEQ|A.fasta", ">SEQ|A\nACGT\nACGT\n"),
        ("SEQ|B.fasta", ">SEQ|B\nACGT\n>SEQ|B2\nTTTT\n"),
        ("SEQ|C.fasta", ">SEQ|ZZZ\nACGT\n"),
    ]);
    let server = FakeServer::new();
    let ledger = Ledger::open_in_memory().await.unwrap();
    let rec = reconciler(&bucket, &server, &ledger);

    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.candidates, 3);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.retryable, 0);

    // Only A reached the server.
    assert_eq!(server.submit_count("A"), 1);
    assert_eq!(server.submit_count("B"), 0);
    assert_eq!(server.submit_count("ZZZ"), 0);
    assert_eq!(server.submit_count("C"), 0);

    // All three outcomes are terminal, so the next pass is idle and never
    // submits again.
    let second = rec.run_pass(None).await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(server.submits.lock().unwrap().len(), 1);

    let completed = ledger.completed_identities(SERVER_URL, HOST).await.unwrap();
    assert_eq!(
        completed,
        ["A", "B", "C"].iter().map(|s| s.to_string()).collect()
    );
}

#[tokio::test]
async fn untagged_objects_are_never_candidates() {
    let bucket = FakeBucket::new(&[
        ("other.fasta", ">SEQ|X\nACGT\n"),
        ("SEQ|D.fasta", ">SEQ|D\nACGT\n"),
    ]);
    let server = FakeServer::new();
    let ledger = Ledger::open_in_memory().await.unwrap();
    let rec = reconciler(&bucket, &server, &ledger);

    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.listed, 2);
    assert_eq!(summary.candidates, 1);
    assert_eq!(server.submit_count("D"), 1);
    assert_eq!(server.submits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn server_fault_is_retried_next_pass() {
    let bucket = FakeBucket::new(&[("SEQ|E.fasta", ">SEQ|E\nACGT\n")]);
    let mut server = FakeServer::new();
    server.responses.insert("E".to_string(), 503);
    let ledger = Ledger::open_in_memory().await.unwrap();

    {
        let rec = reconciler(&bucket, &server, &ledger);
        let summary = rec.run_pass(None).await.unwrap();
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.retryable, 1);
    }

    // Not terminally resolved, so it stays a candidate.
    let completed = ledger.completed_identities(SERVER_URL, HOST).await.unwrap();
    assert!(completed.is_empty());

    // Server recovers; the next pass re-selects and succeeds.
    server.responses.remove("E");
    let rec = reconciler(&bucket, &server, &ledger);
    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.accepted, 1);
    assert_eq!(server.submit_count("E"), 2);
}

#[tokio::test]
async fn client_rejection_is_terminal() {
    let bucket = FakeBucket::new(&[("SEQ|F.fasta", ">SEQ|F\nACGT\n")]);
    let mut server = FakeServer::new();
    // "Already exists" style rejection: terminal, never retried.
    server.responses.insert("F".to_string(), 409);
    let ledger = Ledger::open_in_memory().await.unwrap();
    let rec = reconciler(&bucket, &server, &ledger);

    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.retryable, 0);

    let second = rec.run_pass(None).await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(server.submit_count("F"), 1);
}

#[tokio::test]
async fn transport_failure_leaves_item_retryable() {
    let bucket = FakeBucket::new(&[("SEQ|G.fasta", ">SEQ|G\nACGT\n")]);
    let mut server = FakeServer::new();
    server.transport_broken = true;
    let ledger = Ledger::open_in_memory().await.unwrap();

    {
        let rec = reconciler(&bucket, &server, &ledger);
        let summary = rec.run_pass(None).await.unwrap();
        assert_eq!(summary.retryable, 1);
        assert_eq!(summary.accepted, 0);
    }

    server.transport_broken = false;
    let rec = reconciler(&bucket, &server, &ledger);
    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.accepted, 1);
}

#[tokio::test]
async fn fetch_fault_skips_item_but_not_pass() {
    let mut bucket = FakeBucket::new(&[
        ("SEQ|H.fasta", ">SEQ|H\nACGT\n"),
        ("SEQ|I.fasta", ">SEQ|I\nACGT\n"),
    ]);
    bucket.broken.insert("SEQ|H.fasta".to_string());
    let server = FakeServer::new();
    let ledger = Ledger::open_in_memory().await.unwrap();

    {
        let rec = reconciler(&bucket, &server, &ledger);
        let summary = rec.run_pass(None).await.unwrap();
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.retryable, 1);
        assert_eq!(server.submit_count("I"), 1);
    }

    // H was never terminally resolved; it comes back once readable.
    bucket.broken.clear();
    let rec = reconciler(&bucket, &server, &ledger);
    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.accepted, 1);
    assert_eq!(server.submit_count("H"), 1);
}

#[tokio::test]
async fn interrupted_batch_resumes_where_it_left_off() {
    let bucket = FakeBucket::new(&[
        ("SEQ|K1.fasta", ">SEQ|K1\nACGT\n"),
        ("SEQ|K2.fasta", ">SEQ|K2\nACGT\n"),
        ("SEQ|K3.fasta", ">SEQ|K3\nACGT\n"),
        ("SEQ|K4.fasta", ">SEQ|K4\nACGT\n"),
    ]);
    let server = FakeServer::new();
    let ledger = Ledger::open_in_memory().await.unwrap();

    // Process only the first two, standing in for a crash mid-batch.
    {
        let rec = reconciler(&bucket, &server, &ledger);
        let summary = rec.run_pass(Some(2)).await.unwrap();
        assert_eq!(summary.accepted, 2);
    }

    // A fresh reconciler recomputes the candidate set and picks up the rest
    // without re-submitting the completed items.
    let rec = reconciler(&bucket, &server, &ledger);
    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.accepted, 2);
    assert_eq!(server.submit_count("K1"), 1);
    assert_eq!(server.submit_count("K3"), 1);
}

#[tokio::test]
async fn empty_payload_and_dry_run() {
    let bucket = FakeBucket::new(&[("SEQ|M.fasta", "")]);
    let server = FakeServer::new();
    let ledger = Ledger::open_in_memory().await.unwrap();
    let rec = reconciler(&bucket, &server, &ledger);

    // Dry run writes nothing.
    let preview = rec.preview_pass().await.unwrap();
    assert_eq!(preview.candidates, 1);
    assert!(ledger
        .completed_identities(SERVER_URL, HOST)
        .await
        .unwrap()
        .is_empty());

    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(server.submits.lock().unwrap().len(), 0);

    // Empty input is terminal.
    let completed = ledger.completed_identities(SERVER_URL, HOST).await.unwrap();
    assert!(completed.contains("M"));
}

#[tokio::test]
async fn identities_already_in_server_are_skipped() {
    let bucket = FakeBucket::new(&[
        ("SEQ|N.fasta", ">SEQ|N\nACGT\n"),
        ("SEQ|P.fasta", ">SEQ|P\nACGT\n"),
    ]);
    let server = FakeServer::new();
    server.held.lock().unwrap().insert("N".to_string());
    let ledger = Ledger::open_in_memory().await.unwrap();
    let rec = reconciler(&bucket, &server, &ledger);

    let summary = rec.run_pass(None).await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(server.submit_count("N"), 0);
    assert_eq!(server.submit_count("P"), 1);
}

#[tokio::test]
async fn each_pass_writes_one_checkpoint() {
    let bucket = FakeBucket::new(&[("SEQ|Q.fasta", ">SEQ|Q\nACGT\n")]);
    let server = FakeServer::new();
    let ledger = Ledger::open_in_memory().await.unwrap();
    let rec = reconciler(&bucket, &server, &ledger);

    rec.run_pass(None).await.unwrap();
    let stats = ledger.stats().await.unwrap();
    let check = stats.last_check.expect("checkpoint written");
    assert_eq!(check.batch_size, 1);
    assert_eq!(check.host_name, HOST);
    assert_eq!(check.server_url, SERVER_URL);

    // A second, idle pass still checkpoints (zero candidates computed).
    rec.run_pass(None).await.unwrap();
    let stats = ledger.stats().await.unwrap();
    assert_eq!(stats.last_check.unwrap().batch_size, 0);
}
