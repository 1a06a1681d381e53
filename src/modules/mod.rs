pub mod agent_reaper;
