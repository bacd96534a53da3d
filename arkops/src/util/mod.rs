//! Small shared helpers.

pub mod wait;
