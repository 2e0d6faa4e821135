//! Command implementations.

pub(crate) mod check;
pub(crate) mod output;
