mod attention;
mod discriminator;
mod encoder;
mod generator;

pub use attention::*;
pub use discriminator::*;
pub use encoder::*;
pub use generator::*;
