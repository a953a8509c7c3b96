pub mod cli;
pub mod input;
pub mod jobs;
pub mod orchestrator;
pub mod plot;
pub mod predict;
pub mod registry;
pub mod report;
pub mod train;
pub mod util;
