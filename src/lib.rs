pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fastq;
pub mod matrix;
pub mod output;
pub mod pool;
pub mod scheduler;
pub mod series;
pub mod sra;
pub mod srr;
pub mod store;
pub mod tui;
pub mod writer;
