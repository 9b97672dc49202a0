pub mod backend;
pub mod notifier;
pub mod orchestrator;
pub mod stage_queue;
pub mod transport;
