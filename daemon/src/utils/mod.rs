pub use args::split_arguments;
pub use cache::AsyncTimedCache;

mod args;
mod cache;
pub mod fs;
