pub mod cache;
pub mod catalog;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod gtfs;
pub mod infra;
pub mod merge;
pub mod output;
pub mod package;
pub mod plan;
