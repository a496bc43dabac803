use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Wraps a planned `rustfft` transform together with its working buffers.
///
/// One helper per thread; frames are loaded with a window applied and
/// zero-padded up to the transform size.
pub struct FftHelper {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex32::zero(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            buffer: vec![Complex32::zero(); size],
            scratch,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Transforms a real frame; samples past `input.len()` are zero.
    pub fn forward_real(&mut self, input: &[f32], window: &[f32]) -> &[Complex32] {
        for (idx, slot) in self.buffer.iter_mut().enumerate() {
            *slot = match (input.get(idx), window.get(idx)) {
                (Some(&value), Some(&w)) => Complex32::new(value * w, 0.0),
                _ => Complex32::zero(),
            };
        }
        self.run()
    }

    /// Transforms a complex (IQ) frame; samples past `input.len()` are zero.
    pub fn forward_complex(&mut self, input: &[Complex32], window: &[f32]) -> &[Complex32] {
        for (idx, slot) in self.buffer.iter_mut().enumerate() {
            *slot = match (input.get(idx), window.get(idx)) {
                (Some(&value), Some(&w)) => value * w,
                _ => Complex32::zero(),
            };
        }
        self.run()
    }

    fn run(&mut self) -> &[Complex32] {
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer
    }
}
