//! Background side of the chat: owns the conversation history and the
//! inference engine, and answers [`WorkerCommand`]s with [`WorkerEvent`]s.
//!
//! [`WorkerCommand`]: shared::protocol::WorkerCommand
//! [`WorkerEvent`]: shared::protocol::WorkerEvent

pub mod proxy;
pub mod stdio;
pub mod thread;

pub use proxy::{WorkerConfig, WorkerPhase, WorkerProxy};
pub use stdio::serve_json_lines;
pub use thread::spawn_worker_thread;

/// Capacity of the queue between the command intake and the worker loop.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;
