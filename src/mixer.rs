use crate::common::*;

/// A shuffled 2N-sized discriminator batch of real and fake captions.
#[derive(Debug)]
pub struct MixedBatch {
    pub images: Tensor,
    pub captions: Tensor,
    pub lengths: Tensor,
    pub labels: Tensor,
}

/// Combines a real batch and an equal-size fake batch into one training batch.
///
/// Real rows come first and are labeled 1.0, fake rows follow with 0.0; the
/// image batch is duplicated since the fake captions were conditioned on the
/// same images. A single permutation is applied identically to captions,
/// lengths, images and labels so no systematic real/fake ordering reaches the
/// discriminator. The permutation is drawn from `rng`, a randomness source
/// separate from libtorch's weight-init generator.
pub fn mix_real_fake(
    images: &Tensor,
    real_captions: &Tensor,
    real_lengths: &Tensor,
    fake_captions: &Tensor,
    fake_lengths: &Tensor,
    rng: &mut impl Rng,
) -> Result<MixedBatch> {
    let (num_real, real_width) = real_captions.size2()?;
    let (num_fake, fake_width) = fake_captions.size2()?;
    ensure!(
        num_real == num_fake,
        "real and fake batch sizes differ: {} vs {}",
        num_real,
        num_fake
    );
    ensure!(
        real_width == fake_width,
        "real and fake caption widths differ: {} vs {}",
        real_width,
        fake_width
    );

    let device = real_captions.device();

    let captions = Tensor::cat(&[real_captions, fake_captions], 0);
    let lengths = Tensor::cat(&[real_lengths, fake_lengths], 0);
    let images = Tensor::cat(&[images, images], 0);
    let labels = Tensor::cat(
        &[
            Tensor::ones(&[num_real], (Kind::Float, device)),
            Tensor::zeros(&[num_real], (Kind::Float, device)),
        ],
        0,
    );

    let perm = {
        let mut indices: Vec<i64> = (0..num_real * 2).collect();
        indices.shuffle(rng);
        Tensor::of_slice(&indices).to_device(device)
    };

    Ok(MixedBatch {
        images: images.index_select(0, &perm),
        captions: captions.index_select(0, &perm),
        lengths: lengths.index_select(0, &perm),
        labels: labels.index_select(0, &perm),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_batch() -> (Tensor, Tensor, Tensor, Tensor, Tensor) {
        // Real caption rows start at 10 + i, fake rows at 100 + i, image rows
        // hold the example index i, so per-row association stays checkable
        // after shuffling.
        let images = Tensor::of_slice(&[0i64, 1]).view([2, 1]);
        let real_captions = Tensor::of_slice(&[10i64, 11, 2, 11, 12, 2]).view([2, 3]);
        let real_lengths = Tensor::of_slice(&[3i64, 3]);
        let fake_captions = Tensor::of_slice(&[100i64, 2, 0, 101, 2, 0]).view([2, 3]);
        let fake_lengths = Tensor::of_slice(&[2i64, 2]);
        (images, real_captions, real_lengths, fake_captions, fake_lengths)
    }

    #[test]
    fn label_counts_test() -> Result<()> {
        let (images, real_caps, real_lens, fake_caps, fake_lens) = toy_batch();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..16 {
            let mixed = mix_real_fake(
                &images, &real_caps, &real_lens, &fake_caps, &fake_lens, &mut rng,
            )?;

            ensure!(mixed.labels.size() == vec![4]);
            ensure!(mixed.captions.size() == vec![4, 3]);

            // The label multiset is unchanged by any permutation drawn.
            let ones = f64::from(&mixed.labels.sum(Kind::Float));
            ensure!(ones == 2.0, "expected 2 ones, got {}", ones);
        }

        Ok(())
    }

    #[test]
    fn real_rows_first_test() -> Result<()> {
        let (images, real_caps, real_lens, fake_caps, fake_lens) = toy_batch();
        let mut rng = StdRng::seed_from_u64(3);

        let mixed = mix_real_fake(
            &images, &real_caps, &real_lens, &fake_caps, &fake_lens, &mut rng,
        )?;

        // Pre-permutation layout is [1, 1, 0, 0]; undo the shuffle by reading
        // each row's origin off its caption marker. Rows whose caption starts
        // below 100 came from the real half and must carry label 1.
        for row in 0..4 {
            let first = mixed.captions.int64_value(&[row, 0]);
            let label = f64::from(&mixed.labels.get(row));
            if first < 100 {
                ensure!(label == 1.0);
            } else {
                ensure!(label == 0.0);
            }
        }

        Ok(())
    }

    #[test]
    fn association_preserved_test() -> Result<()> {
        let (images, real_caps, real_lens, fake_caps, fake_lens) = toy_batch();
        let mut rng = StdRng::seed_from_u64(42);

        let mixed = mix_real_fake(
            &images, &real_caps, &real_lens, &fake_caps, &fake_lens, &mut rng,
        )?;

        for row in 0..4 {
            let first = mixed.captions.int64_value(&[row, 0]);
            let image = mixed.images.int64_value(&[row, 0]);
            let length = mixed.lengths.int64_value(&[row]);
            let label = f64::from(&mixed.labels.get(row));

            if label == 1.0 {
                ensure!(first - 10 == image, "real caption detached from its image");
                ensure!(length == 3);
            } else {
                ensure!(first - 100 == image, "fake caption detached from its image");
                ensure!(length == 2);
            }
        }

        Ok(())
    }

    #[test]
    fn mismatched_batch_test() {
        let (images, real_caps, real_lens, fake_caps, fake_lens) = toy_batch();
        let mut rng = StdRng::seed_from_u64(0);

        let short_fake = fake_caps.narrow(0, 0, 1);
        let short_lens = fake_lens.narrow(0, 0, 1);
        assert!(mix_real_fake(
            &images, &real_caps, &real_lens, &short_fake, &short_lens, &mut rng
        )
        .is_err());
    }
}
