//! Op handlers of the interpreter, one file per instruction family.

pub(crate) mod control_flow;
pub(crate) mod output;
pub(crate) mod process;
pub(crate) mod variables;
