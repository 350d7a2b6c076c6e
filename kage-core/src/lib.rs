//! This crate contains the wire-format types and cryptographic compositions shared by the
//! `kage` crates.
//!
//! You are probably looking for the `kage` crate itself. You should only need to depend
//! on this crate directly if you are implementing a custom recipient type.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

// Re-export crates that are used in our public API.
pub use secrecy;

pub mod format;
pub mod primitives;
