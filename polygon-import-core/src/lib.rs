#![doc = "polygon-import-core: core logic library for polygon-import."]

//! This crate contains the import pipeline for Polygon problem packages:
//! per-problem marker files, package discovery, archive unpacking, resource
//! diffs and the orchestration that drives a remote Polygon session.
//! No network code lives here; the remote service is reached through the
//! traits in [`contract`].
//!
//! # Usage
//! The `polygon-import` binary wires a concrete HTTP client into
//! [`import::import_single`] and [`import::import_many`].

pub mod archive;
pub mod config;
pub mod contract;
pub mod descriptor;
pub mod diff;
pub mod import;
pub mod locate;
pub mod marker;
