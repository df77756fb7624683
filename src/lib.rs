//! Medicare Part D GLP-1 access scoring.
//!
//! Loads the CMS plan, formulary and beneficiary-cost files, extracts one
//! coverage record per plan and GLP-1 product, scores how hard each product
//! is to obtain on each plan, and summarizes the result.

pub mod catalog;
pub mod columns;
pub mod config;
pub mod constants;
pub mod demo;
pub mod error;
pub mod export;
pub mod extract;
pub mod loader;
pub mod lookup;
pub mod pipeline;
pub mod score;
pub mod summary;
pub mod table;
