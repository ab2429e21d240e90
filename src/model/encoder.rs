use crate::common::*;

#[derive(Debug, Clone)]
pub struct EncoderInit<const DEPTH: usize> {
    pub input_channels: usize,
    pub channels: [usize; DEPTH],
    pub strides: [usize; DEPTH],
    pub encoder_dim: usize,
    pub grid_size: usize,
}

impl<const DEPTH: usize> EncoderInit<DEPTH> {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Encoder> {
        ensure!(DEPTH > 0, "zero depth is not allowed");

        let path = path.borrow();
        let Self {
            input_channels,
            channels,
            strides,
            encoder_dim,
            grid_size,
        } = self;
        ensure!(grid_size > 0, "zero grid size is not allowed");

        let last_channels = *channels.last().unwrap();

        let blocks: Vec<_> = izip!(
            iter::once(input_channels).chain(channels.into_iter()),
            channels.into_iter(),
            strides.into_iter(),
        )
        .enumerate()
        .map(|(index, (in_c, out_c, stride))| {
            let conv = nn::conv2d(
                path / format!("conv_{}", index),
                in_c as i64,
                out_c as i64,
                3,
                nn::ConvConfig {
                    stride: stride as i64,
                    padding: 1,
                    bias: false,
                    ..Default::default()
                },
            );
            let bn = nn::batch_norm2d(
                path / format!("bn_{}", index),
                out_c as i64,
                Default::default(),
            );
            (conv, bn)
        })
        .collect();

        let project = nn::conv2d(
            path / "project",
            last_channels as i64,
            encoder_dim as i64,
            1,
            nn::ConvConfig {
                bias: false,
                ..Default::default()
            },
        );

        Ok(Encoder {
            blocks,
            project,
            grid_size: grid_size as i64,
        })
    }
}

/// Convolutional image encoder, raw pixels to a `[batch, regions, encoder_dim]`
/// feature grid. Frozen at run time; its internals stand in for whichever
/// pretrained backbone produced the precomputed features.
#[derive(Debug)]
pub struct Encoder {
    blocks: Vec<(nn::Conv2D, nn::BatchNorm)>,
    project: nn::Conv2D,
    grid_size: i64,
}

impl Encoder {
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self
            .blocks
            .iter()
            .fold(images.shallow_clone(), |xs, (conv, bn)| {
                xs.apply(conv).apply_t(bn, train).relu()
            });
        let xs = xs.adaptive_avg_pool2d(&[self.grid_size, self.grid_size]);
        let xs = xs.apply(&self.project);

        let (num, dim, gh, gw) = xs.size4()?;
        Ok(xs.view([num, dim, gh * gw]).transpose(1, 2))
    }
}
