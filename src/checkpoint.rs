use crate::{common::*, config::SamplingMethod, FILE_STRFTIME};

/// Optimizer metadata stored next to a discriminator snapshot. The binding
/// exposes no Adam moment tensors; learning rate and epoch are what can be
/// restored into a rebuilt optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSnapshot {
    pub epoch: usize,
    pub learning_rate: R64,
}

#[derive(Debug)]
pub struct LoadedCheckpoint {
    pub path: PathBuf,
    pub optimizer: Option<OptimizerSnapshot>,
}

/// Parameter snapshots under `<storage>/ckpts/<dataset>/{gen,dis}/`.
///
/// Loading an absent file is not an error: "no prior checkpoint" is an
/// ordinary state and yields `None`. Saving always writes a new epoch-tagged,
/// timestamped file and never overwrites in place.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    dataset: String,
}

impl CheckpointStore {
    pub fn new(storage: impl AsRef<Path>, dataset: impl Into<String>) -> Self {
        Self {
            root: storage.as_ref().join("ckpts"),
            dataset: dataset.into(),
        }
    }

    fn gen_dir(&self) -> PathBuf {
        self.root.join(&self.dataset).join("gen")
    }

    fn dis_dir(&self) -> PathBuf {
        self.root.join(&self.dataset).join("dis")
    }

    pub fn load_generator(
        &self,
        filename: Option<&str>,
        vs: &mut nn::VarStore,
    ) -> Result<Option<PathBuf>> {
        let filename = match filename {
            Some(filename) if !filename.is_empty() => filename,
            _ => return Ok(None),
        };

        let path = self.gen_dir().join(filename);
        if !path.is_file() {
            return Ok(None);
        }

        vs.load(&path)
            .with_context(|| format!("malformed generator checkpoint '{}'", path.display()))?;
        Ok(Some(path))
    }

    pub fn load_discriminator(
        &self,
        filename: Option<&str>,
        vs: &mut nn::VarStore,
    ) -> Result<Option<LoadedCheckpoint>> {
        let filename = match filename {
            Some(filename) if !filename.is_empty() => filename,
            _ => return Ok(None),
        };

        let path = self.dis_dir().join(filename);
        if !path.is_file() {
            return Ok(None);
        }

        vs.load(&path)
            .with_context(|| format!("malformed discriminator checkpoint '{}'", path.display()))?;

        let meta_path = meta_path_for(&path);
        let optimizer = if meta_path.is_file() {
            let text = fs::read_to_string(&meta_path)?;
            let snapshot: OptimizerSnapshot = serde_json::from_str(&text).with_context(|| {
                format!("malformed optimizer snapshot '{}'", meta_path.display())
            })?;
            Some(snapshot)
        } else {
            None
        };

        Ok(Some(LoadedCheckpoint { path, optimizer }))
    }

    /// Saves discriminator parameters and the optimizer sidecar, tagged with
    /// epoch index, sampling method and backbone identifier.
    pub fn save_discriminator(
        &self,
        vs: &nn::VarStore,
        snapshot: &OptimizerSnapshot,
        method: SamplingMethod,
        backbone: &str,
    ) -> Result<PathBuf> {
        let dir = self.dis_dir();
        fs::create_dir_all(&dir)?;

        let filename = format!(
            "pretrain_dis_{}_{}_{}_{}.ckpt",
            snapshot.epoch,
            method.name(),
            backbone,
            Local::now().format(FILE_STRFTIME),
        );
        let path = dir.join(filename);

        vs.save(&path)?;
        fs::write(
            meta_path_for(&path),
            serde_json::to_string_pretty(snapshot)?,
        )?;

        Ok(path)
    }
}

fn meta_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".meta.json");
    path.with_file_name(name)
}
