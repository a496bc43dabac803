pub mod buffer;
pub mod loader;

pub use buffer::{SampleBuffer, Samples};
pub use loader::WaveformLoader;
