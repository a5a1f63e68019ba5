pub mod config;
pub mod error;
pub mod event_mapper;
pub mod task_sync_client;
