pub mod fps;
pub mod gamma;
pub mod manager;
pub mod observer;
pub mod preview;
pub mod queue;
pub mod state;
pub mod stats;
pub mod subframe;
mod worker;

pub use fps::FpsMeter;
pub use gamma::{GammaLut16, SRGB_LUT};
pub use manager::{StreamManager, StreamManagerBuilder};
pub use observer::{NoopObserver, StreamObserver, TracingObserver};
pub use preview::PreviewRunner;
pub use queue::FrameQueue;
pub use state::{FormatSupport, FpsReadout, FrameDisposition, RecordMode, RecordState, StreamState};
pub use stats::{FrameStats, StatsSnapshot};
pub use subframe::subframe;
