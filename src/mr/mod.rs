//! MapReduce dense matrix multiplication.
//!
//! The job is split the classic way: every element of `A` and `B` is routed to
//! each output cell that needs it, and each cell reduces its bucket into one
//! dot product. [`local`] runs the job in-process, [`coordinator`] and
//! [`worker`] run it across processes.

pub mod coordinator;
pub mod error;
pub mod function;
pub mod local;
pub mod matrix;
pub mod output;
pub mod worker;
