pub mod client;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod records;
pub mod retry;
pub mod sanitize;
pub mod sink;
