pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use chrono::Local;
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools};
pub use noisy_float::prelude::*;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    fs, iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
pub use tch::{
    kind::{FLOAT_CPU, INT64_CPU},
    nn::{self, OptimizerConfig, RNN},
    Device, Kind, Reduction, Tensor,
};
pub use tch_tensor_like::TensorLike;
pub use tracing::{debug, info, warn};
pub use unzip_n::unzip_n;

pub type Fallible<T> = Result<T>;

unzip_n!(pub 3);
