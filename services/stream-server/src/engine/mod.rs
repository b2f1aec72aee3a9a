pub mod actor;
pub mod append;
pub mod fanout;
pub mod idempotency;
pub mod longpoll;
pub mod offset;
pub mod operation;
pub mod read;
pub mod rotation;
pub mod segment_codec;
pub mod sse;
pub mod types;
