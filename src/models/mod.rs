pub mod agent;
pub mod assistant;
pub mod chat;
