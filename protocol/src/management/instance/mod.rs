mod config;
mod report;
mod status;

pub use config::*;
pub use report::*;
pub use status::*;
