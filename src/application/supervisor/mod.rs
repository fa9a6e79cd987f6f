mod prompts;
mod service;

pub use service::{Chunk, Supervisor, TurnRequest};
