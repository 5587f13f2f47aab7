// Library interface for lecta modules
// This allows tests and the binaries to import modules

pub mod article;
pub mod cache;
pub mod category;
pub mod classifier;
pub mod ingestion;
pub mod llm;
pub mod processing;
pub mod rules;
pub mod scraping;
pub mod session;
pub mod storage;
