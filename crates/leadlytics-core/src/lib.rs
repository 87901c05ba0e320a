pub mod cache;
pub mod classify;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod event;
pub mod identity;
pub mod rollup;
pub mod service;
pub mod summary;
pub mod visitor;
