//! Types shared by the chat controller and the LLM worker: conversation
//! domain types, the tagged wire protocol between the two, and the error
//! taxonomy both sides report against.

pub mod domain;
pub mod error;
pub mod protocol;
