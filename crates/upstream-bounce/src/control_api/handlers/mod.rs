//! Control API request handlers.

pub mod instances;
pub mod system;
