pub mod ingest;
pub mod layout;
