#![doc = "ado-export-core: core logic library for ado-export."]

//! This crate holds everything the exporter does that does not need a network client:
//! the collaborator traits, the work item enumeration core, the three extraction passes,
//! the report sink and the clone/cleanup helpers.
//! The Azure DevOps REST client lives in the `ado-export` binary crate and implements
//! the traits from [`contract`].
//!
//! # Usage
//! Build an [`export::ExportPlan`], hand [`export::run_export`] a client, an inspector and a
//! [`report::ReportSink`], then save the report.

pub mod cleanup;
pub mod config;
pub mod contract;
pub mod enumerate;
pub mod export;
pub mod fetch;
pub mod git;
pub mod pipelines;
pub mod relations;
pub mod report;
pub mod report_path;
pub mod repositories;
pub mod work_items;
