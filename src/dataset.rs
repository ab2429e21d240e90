use crate::{common::*, config::ImageSource};
use tch::vision;

/// One manifest entry: an image file name and its caption as token indices,
/// including the start and end symbols.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionRecord {
    pub image: String,
    pub caption: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct DatasetInit<P>
where
    P: AsRef<Path>,
{
    pub storage: P,
    pub name: String,
    pub source: ImageSource,
    pub backbone: String,
    pub pad_token: i64,
}

impl<P> DatasetInit<P>
where
    P: AsRef<Path>,
{
    pub fn load(self) -> Result<ImageCaptionDataset> {
        let Self {
            storage,
            name,
            source,
            backbone,
            pad_token,
        } = self;
        let storage = storage.as_ref();
        let processed_dir = storage.join("processed_data").join(&name);

        let manifest_file = processed_dir.join("train_captions.json");
        let records: Vec<CaptionRecord> = {
            let text = fs::read_to_string(&manifest_file).with_context(|| {
                format!("unable to read caption manifest '{}'", manifest_file.display())
            })?;
            serde_json::from_str(&text).with_context(|| {
                format!("malformed caption manifest '{}'", manifest_file.display())
            })?
        };

        ensure!(!records.is_empty(), "empty dataset is not allowed");
        ensure!(
            records.iter().all(|record| !record.caption.is_empty()),
            "caption records must not be empty"
        );
        info!("{} caption records", records.len());

        let source = match source {
            ImageSource::Features => {
                let feats_file = processed_dir
                    .join("feats")
                    .join(format!("train_{}.pt", backbone));
                let feats = Tensor::load(&feats_file)
                    .with_context(|| {
                        format!("unable to read feature file '{}'", feats_file.display())
                    })?
                    .to_kind(Kind::Float);

                // pooled feature files become single-region grids
                let feats = match feats.dim() {
                    2 => feats.unsqueeze(1),
                    3 => feats,
                    dim => bail!("feature file has unsupported rank {}", dim),
                };
                ensure!(
                    feats.size()[0] == records.len() as i64,
                    "{} feature rows do not match {} caption records",
                    feats.size()[0],
                    records.len()
                );

                Source::Features(feats)
            }
            ImageSource::Images { image_size } => Source::Images {
                dir: storage.join("images").join(&name),
                size: image_size.get() as i64,
            },
        };

        Ok(ImageCaptionDataset {
            records,
            source,
            pad_token,
        })
    }
}

#[derive(Debug)]
enum Source {
    Features(Tensor),
    Images { dir: PathBuf, size: i64 },
}

#[derive(Debug)]
pub struct ImageCaptionDataset {
    records: Vec<CaptionRecord>,
    source: Source,
    pad_token: i64,
}

impl ImageCaptionDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shuffled record indices for one epoch, chunked into batches. The final
    /// partial batch is kept.
    pub fn epoch_plan(&self, batch_size: usize, rng: &mut impl Rng) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.records.len()).collect();
        indices.shuffle(rng);

        indices
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Builds one CPU batch: images (pixels or feature grids), captions
    /// padded to the batch max length, and true lengths.
    pub fn batch(&self, indices: &[usize]) -> Result<(Tensor, Tensor, Tensor)> {
        ensure!(!indices.is_empty(), "empty batch is not allowed");

        let width = indices
            .iter()
            .map(|&index| self.records[index].caption.len())
            .max()
            .unwrap();

        let rows: Vec<(Tensor, Vec<i64>, i64)> = indices
            .iter()
            .map(|&index| -> Result<_> {
                let record = &self.records[index];
                let image = self.image(index, record)?;

                let length = record.caption.len() as i64;
                let mut caption = record.caption.clone();
                caption.resize(width, self.pad_token);

                Ok((image, caption, length))
            })
            .try_collect()?;

        let (images, captions, lengths) = rows.into_iter().unzip_n_vec();

        let images = Tensor::stack(&images, 0);
        let captions =
            Tensor::of_slice(&captions.concat()).view([indices.len() as i64, width as i64]);
        let lengths = Tensor::of_slice(&lengths);

        Ok((images, captions, lengths))
    }

    fn image(&self, index: usize, record: &CaptionRecord) -> Result<Tensor> {
        let image = match &self.source {
            Source::Features(feats) => feats.get(index as i64),
            Source::Images { dir, size } => {
                let path = dir.join(&record.image);
                let pixels = vision::image::load_and_resize(&path, *size, *size)
                    .with_context(|| format!("unable to load image '{}'", path.display()))?;
                normalize(&(pixels.to_kind(Kind::Float) / 255.0))
            }
        };

        Ok(image)
    }
}

/// ImageNet channel statistics, matching the preprocessing the pretrained
/// backbones expect.
fn normalize(image: &Tensor) -> Tensor {
    let mean = Tensor::of_slice(&[0.485f32, 0.456, 0.406]).view([3, 1, 1]);
    let std = Tensor::of_slice(&[0.229f32, 0.224, 0.225]).view([3, 1, 1]);
    (image - mean) / std
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_dataset() -> ImageCaptionDataset {
        let records = vec![
            CaptionRecord {
                image: "a.jpg".into(),
                caption: vec![1, 4, 2],
            },
            CaptionRecord {
                image: "b.jpg".into(),
                caption: vec![1, 4, 5, 6, 2],
            },
            CaptionRecord {
                image: "c.jpg".into(),
                caption: vec![1, 5, 5, 2],
            },
        ];

        ImageCaptionDataset {
            records,
            source: Source::Features(Tensor::rand(&[3, 4, 8], FLOAT_CPU)),
            pad_token: 0,
        }
    }

    #[test]
    fn batch_padding_test() -> Result<()> {
        let dataset = toy_dataset();
        let (images, captions, lengths) = dataset.batch(&[0, 1])?;

        ensure!(images.size() == vec![2, 4, 8]);
        ensure!(captions.size() == vec![2, 5]);
        ensure!(Vec::<i64>::from(&lengths) == vec![3, 5]);

        // positions beyond a caption's true length hold the pad token
        ensure!(captions.int64_value(&[0, 3]) == 0);
        ensure!(captions.int64_value(&[0, 4]) == 0);
        ensure!(captions.int64_value(&[1, 4]) == 2);

        Ok(())
    }

    #[test]
    fn epoch_plan_test() -> Result<()> {
        let dataset = toy_dataset();
        let mut rng = StdRng::seed_from_u64(11);

        let plan = dataset.epoch_plan(2, &mut rng);
        ensure!(plan.len() == 2);
        ensure!(plan[0].len() == 2);
        ensure!(plan[1].len() == 1, "the final partial batch must be kept");

        let mut covered: Vec<usize> = plan.into_iter().flatten().collect();
        covered.sort_unstable();
        ensure!(covered == vec![0, 1, 2], "every record appears exactly once");

        Ok(())
    }
}
