// Offload - durable background analysis jobs with bounded retries
//
// This library wires the job queue into a deployable worker: logging setup,
// a stand-in analyzer, and re-exports of the queue API.

// Re-export the queue
pub use offload_queue::*;

pub mod echo;
pub mod logging;

pub use echo::EchoAnalyzer;
