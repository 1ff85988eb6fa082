pub mod conflicts;
pub mod executor;
pub mod history;
pub mod staging;
pub mod validate;

pub use conflicts::*;
pub use executor::*;
pub use history::*;
pub use staging::*;
pub use validate::*;
