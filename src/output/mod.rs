pub mod encoder;
pub mod recorder;
pub mod registry;
pub mod sink;

pub use encoder::{Encoder, MjpegEncoder, RawEncoder};
pub use recorder::{RawRecorder, Recorder};
pub use registry::{EncoderRegistry, RecorderRegistry, Registry, Strategy};
pub use sink::{ChannelSink, NullSink, PreviewBlob, PreviewSink};
