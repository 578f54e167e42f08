//! Domain types and pure logic for the page-image batch generator.
//!
//! Nothing in this crate performs network or file I/O beyond path
//! existence checks; ingestion, persistence and service calls live in
//! `bookgen-pipeline` and `bookgen-forge`.

pub mod book;
pub mod conditioning;
pub mod error;
pub mod job;
pub mod keys;
pub mod naming;
pub mod record;
pub mod swap;
pub mod template;
pub mod types;
