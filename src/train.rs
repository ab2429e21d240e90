use crate::{
    checkpoint::{CheckpointStore, OptimizerSnapshot},
    common::*,
    config::{self, ImageSource},
    message::{StatsRecord, TrainingMessage},
    metrics::{binary_accuracy, AverageMeter},
    mixer::mix_real_fake,
    model::{DiscriminatorInit, Encoder, EncoderInit, GeneratorInit},
    sampler::CaptionSamplerInit,
    vocab::Vocabulary,
};
use tokio::sync::mpsc;

pub fn training_worker(
    config: Arc<config::Config>,
    vocab: Vocabulary,
    mut train_rx: mpsc::Receiver<TrainingMessage>,
    stats_tx: mpsc::Sender<StatsRecord>,
) -> Result<()> {
    let device = config.train.device;
    let encoder_dim = config.model.encoder.encoder_dim.get();
    let backbone = &config.model.encoder.backbone;
    let store = CheckpointStore::new(&config.dataset.storage, &config.dataset.name);

    // generator, inference-only for the entire run
    let (_generator_vs, generator) = {
        let mut vs = nn::VarStore::new(device);
        let root = vs.root();

        let generator = GeneratorInit {
            vocab_size: vocab.vocab_size() as usize,
            embedding_dim: config.model.generator.embedding_dim.get(),
            gru_units: config.model.generator.gru_units.get(),
            attention_dim: config.model.generator.attention_dim.get(),
            encoder_dim,
            pad_token: vocab.pad(),
        }
        .build(&root / "generator")?;

        match store.load_generator(config.checkpoint.gen_checkpoint.as_deref(), &mut vs)? {
            Some(path) => info!("restored generator from '{}'", path.display()),
            None => info!("no generator checkpoint, sampling from fresh weights"),
        }

        vs.freeze();
        (vs, generator)
    };

    // discriminator and its optimizer
    let (discriminator_vs, discriminator, mut dis_optimizer, learning_rate) = {
        let mut vs = nn::VarStore::new(device);
        let root = vs.root();

        let discriminator = DiscriminatorInit {
            vocab_size: vocab.vocab_size() as usize,
            embedding_dim: config.model.discriminator.embedding_dim.get(),
            gru_units: config.model.discriminator.gru_units.get(),
            encoder_dim,
            dropout: config.model.discriminator.dropout,
        }
        .build(&root / "discriminator")?;

        let mut learning_rate = config.train.learning_rate.raw();
        match store.load_discriminator(config.checkpoint.dis_checkpoint.as_deref(), &mut vs)? {
            Some(loaded) => {
                info!("restored discriminator from '{}'", loaded.path.display());
                if let Some(snapshot) = &loaded.optimizer {
                    learning_rate = snapshot.learning_rate.raw();
                }
            }
            None => info!("no discriminator checkpoint, training from scratch"),
        }

        let optimizer = nn::adam(0.9, 0.999, 0.).build(&vs, learning_rate)?;
        (vs, discriminator, optimizer, learning_rate)
    };

    // image encoder, only when batches carry raw pixels
    let encoder: Option<(nn::VarStore, Encoder)> = match config.dataset.image_source {
        ImageSource::Features => None,
        ImageSource::Images { .. } => {
            let mut vs = nn::VarStore::new(device);
            let root = vs.root();

            let encoder = EncoderInit {
                input_channels: 3,
                channels: [64, 128, 256],
                strides: [2, 2, 2],
                encoder_dim,
                grid_size: 7,
            }
            .build(&root / "encoder")?;

            if let Some(weights_file) = &config.model.encoder.weights_file {
                vs.load_partial(weights_file)?;
                info!("restored encoder weights from '{}'", weights_file.display());
            }

            vs.freeze();
            Some((vs, encoder))
        }
    };

    let sampler = CaptionSamplerInit {
        method: config.train.sampling_method,
        max_len: config.train.max_len.get(),
        end_token: vocab.end(),
        pad_token: vocab.pad(),
    }
    .build()?;

    // meters live for the whole run, never reset per epoch
    let mut losses = AverageMeter::new();
    let mut accuracy = AverageMeter::new();
    let mut rng = StdRng::from_entropy();
    let print_every = config.logging.print_every.get();
    let mut current_epoch: Option<usize> = None;

    let complete_epoch = |epoch: usize| -> Result<()> {
        if config.checkpoint.save_model {
            let snapshot = OptimizerSnapshot {
                epoch,
                learning_rate: r64(learning_rate),
            };
            let path = store.save_discriminator(
                &discriminator_vs,
                &snapshot,
                config.train.sampling_method,
                backbone,
            )?;
            info!("saved discriminator checkpoint '{}'", path.display());
        }

        info!("completed epoch: {}", epoch);
        Ok(())
    };

    while let Some(msg) = train_rx.blocking_recv() {
        let TrainingMessage {
            epoch,
            batch_index,
            images,
            captions,
            lengths,
        } = msg.to_device(device);

        if let Some(prev) = current_epoch {
            if epoch != prev {
                complete_epoch(prev)?;
            }
        }
        current_epoch = Some(epoch);

        let start_time = Instant::now();

        let feats = match &encoder {
            Some((_vs, encoder)) => tch::no_grad(|| encoder.forward_t(&images, false))?,
            None => images.shallow_clone(),
        };

        let (fake_captions, fake_lengths) =
            sampler.sample(&generator, &feats, &captions, &lengths)?;
        let mixed = mix_real_fake(
            &feats,
            &captions,
            &lengths,
            &fake_captions,
            &fake_lengths,
            &mut rng,
        )?;

        let preds = discriminator.forward_t(&mixed.images, &mixed.captions, &mixed.lengths, true)?;
        let loss = preds.binary_cross_entropy::<Tensor>(&mixed.labels, None, Reduction::Mean);
        dis_optimizer.backward_step(&loss);

        losses.update(f64::from(&loss));
        accuracy.update(binary_accuracy(&preds, &mixed.labels));

        if batch_index % print_every == 0 {
            let batch_time = start_time.elapsed().as_secs_f64();
            info!(
                "epoch: {}\tbatch: {}\ttime per batch: {:.3}\tloss: {:.4} ({:.3})\taccuracy: {:.4} ({:.3})",
                epoch,
                batch_index,
                batch_time,
                losses.val(),
                losses.avg(),
                accuracy.val(),
                accuracy.avg(),
            );

            if config.logging.save_stats {
                let record = StatsRecord {
                    epoch,
                    batch: batch_index,
                    batch_time,
                    loss: losses.val(),
                    loss_avg: losses.avg(),
                    acc: accuracy.val(),
                    acc_avg: accuracy.avg(),
                };

                if stats_tx.blocking_send(record).is_err() {
                    warn!("stats sink is gone, dropping metrics row");
                }
            }
        }
    }

    // the stream closing ends the final epoch
    if let Some(epoch) = current_epoch {
        complete_epoch(epoch)?;
    }

    Ok(())
}
