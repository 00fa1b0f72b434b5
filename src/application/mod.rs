pub mod orchestrator;
pub mod run_report;
pub mod stages;
