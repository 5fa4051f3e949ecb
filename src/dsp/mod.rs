//! Signal processing for the wideband multi-station path.
//!
//! The channelizer turns one 2.4 MS/s IQ capture into N independent
//! 171 kHz PCM streams, one per configured station. The resampler is used
//! by the recorder to bring captured PCM down to the 16 kHz the speech
//! models expect.

pub mod channelizer;
pub mod filter;
pub mod resample;

pub use channelizer::{Channelizer, ChannelizerStats};
pub use resample::resample_to_16k;
