pub mod backlog;
pub mod classifier;
pub mod config;
pub mod contract;
pub mod errors;
pub mod logging;
pub mod scheduler;
pub mod store;
pub mod util;
