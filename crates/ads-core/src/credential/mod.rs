//! Identity and credential data model

mod types;

pub use types::*;
