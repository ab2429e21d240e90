pub mod checkpoint;
pub mod common;
pub mod config;
pub mod dataset;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod mixer;
pub mod model;
pub mod sampler;
pub mod train;
pub mod vocab;

pub(crate) const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";

use crate::{common::*, dataset::DatasetInit, message::TrainingMessage, vocab::Vocabulary};
use futures::prelude::*;
use tokio::sync::mpsc;

pub async fn start(config: config::Config) -> Result<()> {
    let config = Arc::new(config);

    let vocab = Vocabulary::load(config.dataset.processed_dir().join("word_index.json"))?;
    info!("loaded vocabulary of {} tokens", vocab.vocab_size());

    let stats_file = {
        let file_name = format!(
            "pretrain_dis_{}_{}.csv",
            config.train.sampling_method.name(),
            config.model.encoder.backbone,
        );
        config
            .dataset
            .storage
            .join("stats")
            .join(&config.dataset.name)
            .join("dis")
            .join(file_name)
    };

    let (train_tx, train_rx) = mpsc::channel(2);
    let (stats_tx, stats_rx) = mpsc::channel(1);

    // data producer: a finite, epoch-ordered batch stream
    let data_fut = {
        let config = config.clone();
        let vocab = vocab.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let dataset = DatasetInit {
                storage: config.dataset.storage.clone(),
                name: config.dataset.name.clone(),
                source: config.dataset.image_source.clone(),
                backbone: config.model.encoder.backbone.clone(),
                pad_token: vocab.pad(),
            }
            .load()?;

            let batch_size = config.train.batch_size.get();
            let mut rng = StdRng::from_entropy();

            for epoch in 0..config.train.epochs {
                let plan = dataset.epoch_plan(batch_size, &mut rng);

                for (batch_index, indices) in plan.into_iter().enumerate() {
                    let (images, captions, lengths) = dataset.batch(&indices)?;
                    let msg = TrainingMessage {
                        epoch,
                        batch_index,
                        images,
                        captions,
                        lengths,
                    };

                    if train_tx.blocking_send(msg).is_err() {
                        return Ok(());
                    }
                }
            }

            Ok(())
        })
        .map(|result| Fallible::Ok(result??))
    };

    // training worker
    let train_fut = {
        let config = config.clone();

        tokio::task::spawn_blocking(move || train::training_worker(config, vocab, train_rx, stats_tx))
            .map(|result| Fallible::Ok(result??))
    };

    // stats sink
    let stats_fut = tokio::task::spawn(logging::logging_worker(stats_file, stats_rx))
        .map(|result| Fallible::Ok(result??));

    futures::try_join!(data_fut, train_fut, stats_fut)?;

    Ok(())
}
