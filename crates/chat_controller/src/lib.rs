//! Front-end side of the chat: turns user submissions into worker commands
//! and worker events into transcript and status-line updates.

pub mod controller;
pub mod isolated;
pub mod orchestration;
pub mod transcript;

pub use controller::{render_status, ChatController};
pub use isolated::IsolatedWorker;
pub use orchestration::{dispatch_worker_command, DispatchError};
pub use transcript::{Author, Transcript, TranscriptEntry};

/// Capacity of each direction of the controller/worker channel.
pub const CHANNEL_CAPACITY: usize = 256;
