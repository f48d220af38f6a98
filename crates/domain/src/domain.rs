pub mod briefing;
pub mod command;
pub mod embedding;
pub mod event;
pub mod metadata;
pub mod status;
pub mod thread;
