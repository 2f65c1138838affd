pub mod file;
mod records;

pub use records::InstanceRecords;
