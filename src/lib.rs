pub mod aggregate;
pub mod agent;
pub mod coerce;
pub mod config;
pub mod damia;
pub mod filter;
pub mod logging;
pub mod normalize;
pub mod rag;
pub mod record;
pub mod report;
pub mod retry;
