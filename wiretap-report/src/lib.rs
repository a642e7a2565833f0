pub mod builder;
pub mod catalog;

pub use builder::{build as build_report, ReportInput};
pub use catalog::{build_catalog, SessionCollaborator};
