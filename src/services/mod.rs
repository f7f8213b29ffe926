pub mod cli_runner;
pub mod options;
pub mod transport;
