use super::attention::{Attention, AttentionInit};
use crate::{common::*, sampler::SamplingStrategy};

#[derive(Debug, Clone)]
pub struct GeneratorInit {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub gru_units: usize,
    pub attention_dim: usize,
    pub encoder_dim: usize,
    pub pad_token: i64,
}

impl GeneratorInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Generator> {
        let path = path.borrow();
        let Self {
            vocab_size,
            embedding_dim,
            gru_units,
            attention_dim,
            encoder_dim,
            pad_token,
        } = self;
        ensure!(vocab_size > 0, "empty vocabulary is not allowed");
        ensure!(
            (0..vocab_size as i64).contains(&pad_token),
            "pad token {} is out of the vocabulary range",
            pad_token
        );

        let embedding = nn::embedding(
            path / "embedding",
            vocab_size as i64,
            embedding_dim as i64,
            nn::EmbeddingConfig {
                padding_idx: pad_token,
                ..Default::default()
            },
        );
        let attention = AttentionInit {
            encoder_dim,
            hidden_dim: gru_units,
            attention_dim,
        }
        .build(path / "attention");
        let gru = nn::gru(
            &(path / "gru"),
            (embedding_dim + encoder_dim) as i64,
            gru_units as i64,
            Default::default(),
        );
        let init_h = nn::linear(
            path / "init_h",
            encoder_dim as i64,
            gru_units as i64,
            Default::default(),
        );
        let output = nn::linear(
            path / "output",
            gru_units as i64,
            vocab_size as i64,
            Default::default(),
        );

        Ok(Generator {
            embedding,
            attention,
            gru,
            init_h,
            output,
            pad_token,
        })
    }
}

/// Attention-gated GRU caption generator.
///
/// Only the inference-mode `sample` operation is exposed; this stage never
/// updates generator parameters.
#[derive(Debug)]
pub struct Generator {
    embedding: nn::Embedding,
    attention: Attention,
    gru: nn::GRU,
    init_h: nn::Linear,
    output: nn::Linear,
    pad_token: i64,
}

impl Generator {
    /// Initial hidden state derived from the mean image feature.
    pub fn init_state(&self, feats: &Tensor) -> nn::GRUState {
        let pooled = feats.mean_dim(&[1], false, Kind::Float);
        nn::GRUState(pooled.apply(&self.init_h).tanh().unsqueeze(0))
    }

    /// Autoregressively emits up to `target_len` tokens after the start
    /// symbol, one per step, picking each with `strategy`. The result is a
    /// `[batch, width]` integer tensor: the start column, the emitted tokens
    /// clamped to `width`, and pad tokens filling the remainder.
    pub fn sample(
        &self,
        target_len: i64,
        width: i64,
        feats: &Tensor,
        start_tokens: &Tensor,
        state: Option<nn::GRUState>,
        strategy: &dyn SamplingStrategy,
    ) -> Result<(Tensor, nn::GRUState)> {
        let (num, _regions, _dim) = feats.size3()?;
        ensure!(width >= 1, "caption width must be positive");
        ensure!(
            start_tokens.size() == vec![num],
            "start token batch does not match the feature batch"
        );

        let mut state = state.unwrap_or_else(|| self.init_state(feats));
        let mut prev = start_tokens.shallow_clone();
        let mut tokens = vec![start_tokens.shallow_clone()];

        for _ in 0..target_len {
            if tokens.len() as i64 >= width {
                break;
            }

            let emb = prev.apply(&self.embedding);
            let hidden = state.0.select(0, 0);
            let (context, _weights) = self.attention.forward(feats, &hidden)?;
            let input = Tensor::cat(&[emb, context], 1);

            state = self.gru.step(&input, &state);
            let logits = state.0.select(0, 0).apply(&self.output);
            let next = strategy.pick(&logits);

            tokens.push(next.shallow_clone());
            prev = next;
        }

        let seq = Tensor::stack(&tokens, 1);
        let cols = seq.size2()?.1;
        let seq = if cols < width {
            let filler = Tensor::full(
                &[num, width - cols],
                self.pad_token,
                (Kind::Int64, seq.device()),
            );
            Tensor::cat(&[seq, filler], 1)
        } else {
            seq
        };

        Ok((seq, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::Greedy;

    #[test]
    fn generator_sample_test() -> Result<()> {
        let bs = 2;
        let vocab_size = 10;
        let width = 6;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let generator = GeneratorInit {
            vocab_size,
            embedding_dim: 8,
            gru_units: 12,
            attention_dim: 6,
            encoder_dim: 4,
            pad_token: 0,
        }
        .build(&root)?;

        let feats = Tensor::rand(&[bs, 3, 4], FLOAT_CPU);
        let start_tokens = Tensor::of_slice(&[1i64, 1]);

        let (seq, _state) = generator.sample(9, width, &feats, &start_tokens, None, &Greedy)?;

        ensure!(seq.size() == vec![bs, width]);
        ensure!(seq.kind() == Kind::Int64);
        ensure!(seq.int64_value(&[0, 0]) == 1, "start column must be kept");

        // every emitted index stays inside the vocabulary
        let max = seq.max();
        let min = seq.min();
        ensure!(i64::from(&max) < vocab_size as i64);
        ensure!(i64::from(&min) >= 0);

        Ok(())
    }

    #[test]
    fn short_target_is_padded_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let generator = GeneratorInit {
            vocab_size: 10,
            embedding_dim: 8,
            gru_units: 12,
            attention_dim: 6,
            encoder_dim: 4,
            pad_token: 0,
        }
        .build(&root)?;

        let feats = Tensor::rand(&[1, 3, 4], FLOAT_CPU);
        let start_tokens = Tensor::of_slice(&[1i64]);

        // 2 emitted tokens + start, remaining 5 columns hold the pad token
        let (seq, _state) = generator.sample(2, 8, &feats, &start_tokens, None, &Greedy)?;
        ensure!(seq.size() == vec![1, 8]);
        for col in 3..8 {
            ensure!(seq.int64_value(&[0, col]) == 0);
        }

        Ok(())
    }
}
