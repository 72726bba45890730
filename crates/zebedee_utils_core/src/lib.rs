pub mod collection;
pub mod config;
pub mod error;
pub mod jobs;
pub mod moves;
pub mod registry;
pub mod rewrite;
pub mod runtime;
pub mod scanner;
pub mod storage;
pub mod uri;
