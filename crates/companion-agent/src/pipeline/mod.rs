//! Channel-agnostic message pipeline shared by the transport adapter and
//! scheduler-fired turns.

pub mod context;
pub mod process;
