// inkwell-common: shared types and utilities for the Inkwell workspace

pub mod content;
pub mod path;
pub mod protocol;
pub mod types;
