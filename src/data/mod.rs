//! Layout batches, collation, and conditional dropout.

mod batch;
mod dropout;

pub use batch::{collate, LayoutBatch, LayoutSample, NoisyBatch};
pub use dropout::conditional_dropout;
