//! The minimal device contract the stream manager depends on

use crate::capture::frame::FrameGeometry;
use crate::error::Result;

/// Hardware capture seen from the stream manager.
///
/// Drivers implement this next to whatever vendor SDK or serial protocol they
/// wrap. The manager calls `start` at most once per logical start and `stop`
/// at most once per logical stop; frames come back through
/// [`StreamManager::submit_frame`](crate::pipeline::StreamManager::submit_frame)
/// from any thread.
pub trait Capture: Send + Sync {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Layout of the frames the device currently delivers, after binning.
    ///
    /// Only the rectangle is used; pixel format and depth come from
    /// `StreamManager::set_pixel_format`.
    fn source_geometry(&self) -> FrameGeometry;

    /// Name of the filter in the light path, substituted for `_F_` in record
    /// file names.
    fn filter_name(&self) -> Option<String> {
        None
    }

    /// Whether the driver delivers frames that are already compressed
    fn is_compressed(&self) -> bool {
        false
    }
}
