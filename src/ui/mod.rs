/// UI module exports
pub mod frozen;
