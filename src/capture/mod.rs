pub mod device;
pub mod frame;
pub mod synthetic;

pub use device::Capture;
pub use frame::{Frame, FrameGeometry, PixelFormat};
pub use synthetic::SyntheticCamera;
