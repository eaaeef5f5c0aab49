//! # seqfeed
//!
//! Watches an object-store bucket of FASTA sequence files and feeds each
//! distinct sequence into a neighbor server exactly once, recording every
//! attempt in a durable SQLite ledger so the loop survives restarts and
//! partial failures.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Bucket    │──▶│  Reconciler  │──▶│ Neighbor srv  │
//! │ (S3 API)    │   │ S − R − L    │   │  (HTTP API)   │
//! └────────────┘   └──────┬───────┘   └───────────────┘
//!                         │
//!                         ▼
//!                  ┌────────────┐
//!                  │   Ledger    │
//!                  │  (SQLite)   │
//!                  └────────────┘
//! ```
//!
//! Each pass computes the candidate set `S − R − L` (bucket listing minus
//! server holdings minus terminally-resolved ledger entries), drives every
//! candidate through fetch → parse → cross-check → submit, and appends one
//! attempt row per candidate plus one checkpoint per pass. Terminal
//! outcomes — acceptance, client-side rejection, malformed input — are
//! never retried; transient faults are re-selected on the next pass.
//!
//! ## Quick Start
//!
//! ```bash
//! seqfeed init                  # create the ledger database
//! seqfeed sync --dry-run        # show what one pass would do
//! seqfeed sync                  # run a single pass
//! seqfeed run                   # poll forever
//! seqfeed status                # summarise the ledger
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and ledger rows |
//! | [`identity`] | Identity extraction from object names |
//! | [`fasta`] | FASTA payload classification |
//! | [`bucket`] | S3-compatible object-store client |
//! | [`neighbor`] | Neighbor server HTTP client |
//! | [`ledger`] | SQLite attempt ledger |
//! | [`reconcile`] | Candidate selection and the poll loop |
//! | [`traits`] | Seams for the two external collaborators |

pub mod bucket;
pub mod config;
pub mod fasta;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod neighbor;
pub mod reconcile;
pub mod traits;
