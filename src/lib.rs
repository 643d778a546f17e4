pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod report;
