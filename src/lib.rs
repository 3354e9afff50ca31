//! # ferrite-import
//!
//! Copies keys into Ferrite or Redis from running instances or from RDB
//! snapshot files, moving each value as an opaque `DUMP` payload so every
//! data type survives unchanged.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`rdb`] | Snapshot decoding: checksum, LZF, `DUMP` payload reconstruction |
//! | [`pattern`] | Glob and regex key filters |
//! | [`migration`] | Mirror, backfill and dry-run copying in batches |
//! | [`config`] | TOML configuration |
//!
//! ## Quick Start
//!
//! ```ignore
//! use ferrite_import::rdb::DumpDecoder;
//!
//! for entry in DumpDecoder::open("dump.rdb")? {
//!     let entry = entry?;
//!     println!("{:?} ttl={}ms", entry.key, entry.ttl_ms);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod migration;
pub mod pattern;
pub mod rdb;
