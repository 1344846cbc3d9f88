pub mod event_router;
pub mod journal_service;
pub mod orchestrator;
pub mod replication_service;
pub mod resolver;
