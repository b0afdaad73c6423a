//! Semi-reliable request / reply on top of a lossy overlay: requests are resent until they are
//!  answered or their retry budget is used up, received requests are de-duplicated and their
//!  replies cached for answering duplicates.

pub mod error;
pub mod frame;
pub mod handler;
pub mod manager;
pub mod registry;
pub mod reply_cache;
pub mod reqrep_config;
pub mod request_table;
pub mod sweeper;
