//! Upload services: the store contract and its backends, the multipart
//! coordinator, the retry decorator and the whole-file transfer built on them.

pub mod local_store;
pub mod media;
pub mod memory_store;
pub mod object_store;
pub mod retry;
pub mod transfer;
pub mod upload_coordinator;
