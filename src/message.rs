use crate::common::*;

/// One prefetched batch, sent from the data producer to the training worker.
#[derive(Debug, TensorLike)]
pub struct TrainingMessage {
    pub epoch: usize,
    pub batch_index: usize,
    /// Raw pixels or precomputed feature grids, depending on configuration.
    pub images: Tensor,
    pub captions: Tensor,
    pub lengths: Tensor,
}

/// One metrics row, sent from the training worker to the stats sink.
#[derive(Debug, Clone, Serialize)]
pub struct StatsRecord {
    pub epoch: usize,
    pub batch: usize,
    pub batch_time: f64,
    pub loss: f64,
    pub loss_avg: f64,
    pub acc: f64,
    pub acc_avg: f64,
}
