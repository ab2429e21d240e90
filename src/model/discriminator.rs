use crate::common::*;

#[derive(Debug, Clone)]
pub struct DiscriminatorInit {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub gru_units: usize,
    pub encoder_dim: usize,
    pub dropout: f64,
}

impl DiscriminatorInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Discriminator> {
        let path = path.borrow();
        let Self {
            vocab_size,
            embedding_dim,
            gru_units,
            encoder_dim,
            dropout,
        } = self;
        ensure!(vocab_size > 0, "empty vocabulary is not allowed");
        ensure!(
            (0.0..1.0).contains(&dropout),
            "dropout must be in [0, 1), but get dropout = {}",
            dropout
        );

        let embedding = nn::embedding(
            path / "embedding",
            vocab_size as i64,
            embedding_dim as i64,
            Default::default(),
        );
        let gru = nn::gru(
            &(path / "gru"),
            embedding_dim as i64,
            gru_units as i64,
            Default::default(),
        );
        let feat_proj = nn::linear(
            path / "feat_proj",
            encoder_dim as i64,
            gru_units as i64,
            Default::default(),
        );
        let fc = nn::linear(path / "fc", 2 * gru_units as i64, 1, Default::default());

        Ok(Discriminator {
            embedding,
            gru,
            feat_proj,
            fc,
            gru_units: gru_units as i64,
            dropout,
        })
    }
}

/// GRU discriminator scoring a caption against its image.
#[derive(Debug)]
pub struct Discriminator {
    embedding: nn::Embedding,
    gru: nn::GRU,
    feat_proj: nn::Linear,
    fc: nn::Linear,
    gru_units: i64,
    dropout: f64,
}

impl Discriminator {
    /// Returns a per-example probability of "real", shape `[batch]`.
    pub fn forward_t(
        &self,
        feats: &Tensor,
        captions: &Tensor,
        lengths: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (num, _width) = captions.size2()?;
        ensure!(
            feats.dim() == 3,
            "expected a [batch, regions, dim] feature grid, but get {:?}",
            feats.size()
        );

        let emb = captions.apply(&self.embedding);
        let (out, _state) = self.gru.seq(&emb);

        // hidden state at each caption's last real token
        let index = (lengths.clamp_min(1) - 1)
            .view([num, 1, 1])
            .expand(&[num, 1, self.gru_units], false);
        let last = out.gather(1, &index, false).select(1, 0);

        let pooled = feats.mean_dim(&[1], false, Kind::Float);
        let image = pooled.apply(&self.feat_proj).relu();

        let joint = Tensor::cat(&[last, image], 1).dropout(self.dropout, train);
        let probs = joint.apply(&self.fc).view([num]).sigmoid();

        Ok(probs)
    }
}
