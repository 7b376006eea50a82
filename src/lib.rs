//! Background job runner for the antiSMASH database: polls a shared
//! Postgres job table, claims pending jobs, executes the antiSMASH
//! analysis tools inside ephemeral `podman` containers, parses and
//! enriches their output, and commits results with optimistic-concurrency
//! control.
//!
//! Module layout mirrors the teacher's `lib.rs` + `bin/*.rs` split: the
//! library holds every piece of the dispatch pipeline (queue gateway,
//! control gateway, sandbox, handler, dispatcher, supervisor) and the
//! `asdb-jobs` binary is a thin bootstrap over it.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod models;
pub mod results;
pub mod sandbox;
pub mod supervisor;
pub mod version;
