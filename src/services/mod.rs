pub mod completion;
pub mod frames;
pub mod inflight;
pub mod poller;
pub mod status;
pub mod submission;
pub mod worker;
