pub mod artifacts;
pub mod atomic;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod decisions;
pub mod errors;
pub mod gate;
pub mod pipeline;
pub mod queue;
pub mod reflexion;
pub mod scope;
pub mod session;
pub mod workspace;
