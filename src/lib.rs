pub mod config;
pub mod corpus;
pub mod document;
pub mod embedding;
pub mod error;
pub mod glossary;
pub mod jobs;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod quality;
pub mod retrieval;
pub mod retry;
pub mod sentinels;
pub mod service;
pub mod textutil;

pub use error::{PipelineError, Result};
