pub mod bucket;
pub mod common;
pub mod deployment;
pub mod project;

pub use bucket::*;
pub use common::*;
pub use deployment::*;
pub use project::*;
