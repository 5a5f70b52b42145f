pub mod batch;
pub mod boundary;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod slice;
pub mod util;
