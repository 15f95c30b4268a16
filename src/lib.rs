//! # Toolkit Tracker
//!
//! Change-request and code-update tracking for tool-kit release trains.
//!
//! An SVN post-commit hook writes a transcript of each commit; `tkt ingest`
//! turns it into one code update per tool kit that the commit's branch
//! feeds, links the commit's change request, and appends the new code update
//! ids to the transcript so the hook can report them back.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ SVN hook   │──▶│ transcript → branch →    │──▶│  SQLite  │
//! │ data file  │   │ fan-out → change request │   │          │
//! └────────────┘   └──────────────────────────┘   └────┬─────┘
//!       ▲                                              │
//!       └──── DB_ID lines ──────┐                      ▼
//!                               │               ┌────────────┐
//!                               └───────────────│ CLI (tkt)  │
//!                                               └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Application error type |
//! | [`transcript`] | Hook data file parsing and marking |
//! | [`changes`] | Add/update/delete reconciliation |
//! | [`branch`] | Branch inference from changed paths |
//! | [`toolkit`] | Components, tool kits, fan-out |
//! | [`change_request`] | Change request resolution and administration |
//! | [`ingest`] | Transactional code update ingestion |
//! | [`code_update`] | Code update retrieval and level history |
//! | [`report`] | Per tool kit / component summary |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod branch;
pub mod change_request;
pub mod changes;
pub mod code_update;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod report;
pub mod toolkit;
pub mod transcript;
