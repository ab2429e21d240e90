use crate::{common::*, config::SamplingMethod, model::Generator};
use std::fmt::Debug;

/// Next-token policy: given per-example logits over the vocabulary, pick one
/// token per example.
pub trait SamplingStrategy: Debug + Send {
    fn pick(&self, logits: &Tensor) -> Tensor;
}

/// Argmax decoding.
#[derive(Debug, Clone, Copy)]
pub struct Greedy;

impl SamplingStrategy for Greedy {
    fn pick(&self, logits: &Tensor) -> Tensor {
        logits.argmax(-1, false)
    }
}

/// Draw from the softmax distribution.
#[derive(Debug, Clone, Copy)]
pub struct Multinomial;

impl SamplingStrategy for Multinomial {
    fn pick(&self, logits: &Tensor) -> Tensor {
        logits
            .softmax(-1, Kind::Float)
            .multinomial(1, true)
            .view([-1])
    }
}

impl SamplingMethod {
    pub fn strategy(&self) -> Box<dyn SamplingStrategy> {
        match self {
            Self::Greedy => Box::new(Greedy),
            Self::Multinomial => Box::new(Multinomial),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptionSamplerInit {
    pub method: SamplingMethod,
    pub max_len: usize,
    pub end_token: i64,
    pub pad_token: i64,
}

impl CaptionSamplerInit {
    pub fn build(self) -> Result<CaptionSampler> {
        let Self {
            method,
            max_len,
            end_token,
            pad_token,
        } = self;
        ensure!(max_len >= 2, "max_len must be at least 2");
        ensure!(end_token != pad_token, "end and pad tokens must differ");

        Ok(CaptionSampler {
            strategy: method.strategy(),
            max_len,
            end_token,
            pad_token,
        })
    }
}

/// Produces fake-caption batches by sampling the frozen generator,
/// conditioned on the same images as the real captions.
#[derive(Debug)]
pub struct CaptionSampler {
    strategy: Box<dyn SamplingStrategy>,
    max_len: usize,
    end_token: i64,
    pad_token: i64,
}

impl CaptionSampler {
    /// Samples one fake caption per real caption. The fake tensor shares the
    /// real tensor's width so both halves concatenate row-wise; returns the
    /// padded captions and their true lengths, both on the input device.
    ///
    /// Runs under `no_grad`: nothing here may feed the discriminator's
    /// backward pass through the generator.
    pub fn sample(
        &self,
        generator: &Generator,
        feats: &Tensor,
        captions: &Tensor,
        lengths: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        tch::no_grad(|| {
            let (_num, width) = captions.size2()?;
            let device = captions.device();

            let max_real = i64::from(&lengths.max());
            let target_len = max_real.max(self.max_len as i64) - 1;
            let start_tokens = captions.select(1, 0);

            let (raw, _state) = generator.sample(
                target_len,
                width,
                feats,
                &start_tokens,
                None,
                self.strategy.as_ref(),
            )?;

            let (fake_captions, fake_lengths) =
                truncate_and_pad(&raw, self.end_token, self.pad_token)?;

            Ok((
                fake_captions.to_device(device),
                fake_lengths.to_device(device),
            ))
        })
    }
}

/// Cuts each generated row at its first end-of-sequence token (or the
/// generation limit), records the resulting length, and rewrites the tail
/// with the pad token.
fn truncate_and_pad(captions: &Tensor, end_token: i64, pad_token: i64) -> Result<(Tensor, Tensor)> {
    let (num, width) = captions.size2()?;
    let width = width as usize;
    let flat: Vec<i64> = Vec::from(&captions.to_device(Device::Cpu).contiguous().view([-1]));

    let mut out = Vec::with_capacity(flat.len());
    let mut lengths = Vec::with_capacity(num as usize);

    for row in flat.chunks(width) {
        let mut len = width;
        for (index, &token) in row.iter().enumerate().skip(1) {
            if token == end_token {
                len = index + 1;
                break;
            }
            if token == pad_token {
                len = index;
                break;
            }
        }

        lengths.push(len as i64);
        out.extend(row.iter().take(len).copied());
        out.extend(iter::repeat(pad_token).take(width - len));
    }

    Ok((
        Tensor::of_slice(&out).view([num, width as i64]),
        Tensor::of_slice(&lengths),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GeneratorInit;

    const END: i64 = 2;
    const PAD: i64 = 0;

    #[test]
    fn truncate_and_pad_test() -> Result<()> {
        let raw = Tensor::of_slice(&[
            1i64, 5, END, 7, 9, // end mid-row
            1, 5, 6, 7, 9, // no end at all
            1, END, 4, 4, 4, // end right after start
        ])
        .view([3, 5]);

        let (captions, lengths) = truncate_and_pad(&raw, END, PAD)?;

        ensure!(Vec::<i64>::from(&lengths) == vec![3, 5, 2]);
        ensure!(
            Vec::<i64>::from(&captions.view([-1]))
                == vec![1, 5, END, PAD, PAD, 1, 5, 6, 7, 9, 1, END, PAD, PAD, PAD]
        );

        Ok(())
    }

    #[test]
    fn pad_terminates_generation_test() -> Result<()> {
        // rows already padded by the generator stop at the first pad column
        let raw = Tensor::of_slice(&[1i64, 5, 6, PAD, PAD]).view([1, 5]);
        let (captions, lengths) = truncate_and_pad(&raw, END, PAD)?;

        ensure!(Vec::<i64>::from(&lengths) == vec![3]);
        ensure!(Vec::<i64>::from(&captions.view([-1])) == vec![1, 5, 6, PAD, PAD]);

        Ok(())
    }

    #[test]
    fn sampled_lengths_within_width_test() -> Result<()> {
        let bs = 3;
        let width = 6;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let generator = GeneratorInit {
            vocab_size: 10,
            embedding_dim: 8,
            gru_units: 12,
            attention_dim: 6,
            encoder_dim: 4,
            pad_token: PAD,
        }
        .build(&root)?;

        let sampler = CaptionSamplerInit {
            method: SamplingMethod::Multinomial,
            max_len: 20,
            end_token: END,
            pad_token: PAD,
        }
        .build()?;

        let feats = Tensor::rand(&[bs, 3, 4], FLOAT_CPU);
        let captions = Tensor::of_slice(&[
            1i64, 4, 5, 6, 2, 0, //
            1, 4, 2, 0, 0, 0, //
            1, 5, 5, 5, 5, 2,
        ])
        .view([bs, width]);
        let lengths = Tensor::of_slice(&[5i64, 3, 6]);

        let (fake_captions, fake_lengths) =
            sampler.sample(&generator, &feats, &captions, &lengths)?;

        ensure!(fake_captions.size() == vec![bs, width]);
        ensure!(fake_captions.kind() == Kind::Int64);
        ensure!(fake_lengths.size() == vec![bs]);

        for index in 0..bs {
            let len = fake_lengths.int64_value(&[index]);
            ensure!(
                (1..=width).contains(&len),
                "length {} exceeds the padded width {}",
                len,
                width
            );
            ensure!(fake_captions.int64_value(&[index, 0]) == 1);
        }

        // sampling must not build a graph
        ensure!(!fake_captions.requires_grad());

        Ok(())
    }
}
