pub mod files;
pub mod preview;
pub mod query;
pub mod upload;
