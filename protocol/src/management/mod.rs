pub mod content;
pub mod instance;

pub use content::VersionSnapshot;
