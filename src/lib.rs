pub mod app;
pub mod archive;
pub mod assemble;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod output;
pub mod regions;
pub mod remote;
pub mod taxonomy;
