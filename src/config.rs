use crate::common::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: Dataset,
    pub model: Model,
    pub train: Training,
    pub checkpoint: Checkpoint,
    pub logging: Logging,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("malformed config file '{}'", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    /// Storage root containing `processed_data/`, `images/`, `ckpts/` and `stats/`.
    pub storage: PathBuf,
    /// Dataset name, e.g. "flickr8k" or "coco".
    pub name: String,
    pub image_source: ImageSource,
}

impl Dataset {
    pub fn processed_dir(&self) -> PathBuf {
        self.storage.join("processed_data").join(&self.name)
    }
}

/// Raw pixels and precomputed features are mutually exclusive per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Precomputed feature grids, one row per caption record.
    Features,
    /// Raw images, encoded on the fly.
    Images { image_size: NonZeroUsize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub encoder: EncoderModel,
    pub generator: GeneratorModel,
    pub discriminator: DiscriminatorModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderModel {
    /// Backbone identifier, tags checkpoint and stats file names.
    pub backbone: String,
    pub encoder_dim: NonZeroUsize,
    pub weights_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorModel {
    pub embedding_dim: NonZeroUsize,
    pub gru_units: NonZeroUsize,
    pub attention_dim: NonZeroUsize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminatorModel {
    pub embedding_dim: NonZeroUsize,
    pub gru_units: NonZeroUsize,
    pub dropout: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Training {
    pub batch_size: NonZeroUsize,
    pub epochs: usize,
    pub learning_rate: R64,
    /// Lower bound on the generation target length.
    pub max_len: NonZeroUsize,
    pub sampling_method: SamplingMethod,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    Greedy,
    Multinomial,
}

impl SamplingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Multinomial => "multinomial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub save_model: bool,
    /// Generator snapshot to restore at startup, relative to `ckpts/<dataset>/gen/`.
    pub gen_checkpoint: Option<String>,
    /// Discriminator snapshot to restore at startup, relative to `ckpts/<dataset>/dis/`.
    pub dis_checkpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub print_every: NonZeroUsize,
    pub save_stats: bool,
}
