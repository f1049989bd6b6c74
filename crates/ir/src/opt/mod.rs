//! Optimizer-facing services: the computed-value relation used by
//! common-subexpression elimination, and the structural validator.

pub mod computed;
pub mod validate;
