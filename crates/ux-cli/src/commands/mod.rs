pub mod config;
pub mod report;
pub mod run;
pub mod validate;
pub mod validate_output;
