pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod types;

// Ingestion core
pub mod dedup;
pub mod differ;
pub mod fingerprint;
pub mod ingest;
pub mod lineup;
pub mod matcher;
pub mod normalize;
pub mod notify;
pub mod quality;
pub mod resolver;

// Collaborators at the edges
pub mod sources;
pub mod storage;

#[cfg(test)]
mod test_support;
