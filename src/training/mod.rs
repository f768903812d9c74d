//! Training loop, learning-rate schedule, checkpointing, and metrics.

mod checkpoint;
mod metrics;
mod schedule;
mod trainer;

pub use checkpoint::{
    checkpoint_dir, find_latest_checkpoint, list_checkpoints, load_state, prune_oldest,
    save_state, TrainState, MAX_CHECKPOINTS,
};
pub use metrics::{LogSink, MetricsSink, RunningMean};
pub use schedule::WarmupCosineLr;
pub use trainer::train;
