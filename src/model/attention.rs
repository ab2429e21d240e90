use crate::common::*;

#[derive(Debug, Clone)]
pub struct AttentionInit {
    pub encoder_dim: usize,
    pub hidden_dim: usize,
    pub attention_dim: usize,
}

impl AttentionInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Attention {
        let path = path.borrow();
        let Self {
            encoder_dim,
            hidden_dim,
            attention_dim,
        } = self;

        let feat_att = nn::linear(
            path / "feat_att",
            encoder_dim as i64,
            attention_dim as i64,
            Default::default(),
        );
        let hidden_att = nn::linear(
            path / "hidden_att",
            hidden_dim as i64,
            attention_dim as i64,
            Default::default(),
        );
        let full_att = nn::linear(path / "full_att", attention_dim as i64, 1, Default::default());

        Attention {
            feat_att,
            hidden_att,
            full_att,
        }
    }
}

/// Additive attention over a `[batch, regions, encoder_dim]` feature grid.
#[derive(Debug)]
pub struct Attention {
    feat_att: nn::Linear,
    hidden_att: nn::Linear,
    full_att: nn::Linear,
}

impl Attention {
    /// Returns the attended context `[batch, encoder_dim]` and the attention
    /// weights `[batch, regions]`.
    pub fn forward(&self, feats: &Tensor, hidden: &Tensor) -> Result<(Tensor, Tensor)> {
        let (num, regions, _dim) = feats.size3()?;

        let att_f = feats.apply(&self.feat_att);
        let att_h = hidden.apply(&self.hidden_att).unsqueeze(1);
        let scores = (att_f + att_h)
            .tanh()
            .apply(&self.full_att)
            .view([num, regions]);
        let weights = scores.softmax(-1, Kind::Float);

        let context = weights.unsqueeze(1).bmm(feats).select(1, 0);

        Ok((context, weights))
    }
}
