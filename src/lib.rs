pub mod cli;
pub mod codec;
pub mod engine;
pub mod graph;
pub mod protocol;
pub mod statement;

pub use cli::{Command, prompt};
pub use codec::{Mapping, Value};
pub use engine::{QueryEngine, QueryResult};
pub use graph::MemoryEngine;
pub use statement::Statement;
