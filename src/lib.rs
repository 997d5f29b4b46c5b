pub mod api;
pub mod cli;
pub mod collaborators;
pub mod engine;
pub mod stages;
pub mod storage;
