//! HTTP backend serving Bangla NLP pipelines: multilingual article
//! summarization and banglish-to-bangla translation, both decoded with
//! deterministic beam search.

pub mod config;
pub mod error;
pub mod generation;
pub mod model;
pub mod routes;
pub mod service;
pub mod state;
pub mod text;
pub mod tokenizer;
pub mod training;
