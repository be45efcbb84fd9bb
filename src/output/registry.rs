//! Named sets of encoders and recorders with one current selection

use crate::capture::frame::PixelFormat;
use crate::output::encoder::{Encoder, MjpegEncoder, RawEncoder};
use crate::output::recorder::{RawRecorder, Recorder};

/// What the stream manager negotiates with every encoder and recorder
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Returns `false` when the format can not be handled
    fn set_pixel_format(&mut self, format: PixelFormat, depth: u8) -> bool;

    fn set_size(&mut self, _width: u32, _height: u32) -> bool {
        true
    }
}

pub struct Registry<T: ?Sized> {
    items: Vec<Box<T>>,
    current: usize,
}

pub type EncoderRegistry = Registry<dyn Encoder>;
pub type RecorderRegistry = Registry<dyn Recorder>;

impl<T: ?Sized + Strategy> Registry<T> {
    /// Registry holding `default`, which starts out selected
    pub fn new(default: Box<T>) -> Self {
        Self {
            items: vec![default],
            current: 0,
        }
    }

    /// Add a strategy, replacing a registered one with the same name.
    pub fn register(&mut self, item: Box<T>) {
        match self.position(item.name()) {
            Some(index) => self.items[index] = item,
            None => self.items.push(item),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name().eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Make `name` current. Returns the newly selected strategy.
    pub fn select(&mut self, name: &str) -> Option<&mut T> {
        let index = self.position(name)?;
        self.current = index;
        Some(&mut *self.items[index])
    }

    pub fn current(&self) -> &T {
        &*self.items[self.current]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut *self.items[self.current]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.items.iter_mut().map(|item| &mut **item)
    }
}

impl Registry<dyn Encoder> {
    /// RAW (selected) and MJPEG
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(Box::new(RawEncoder::new()));
        registry.register(Box::new(MjpegEncoder::default()));
        registry
    }
}

impl Registry<dyn Recorder> {
    pub fn with_defaults() -> Self {
        Self::new(Box::new(RawRecorder::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_by_name() {
        let mut encoders = EncoderRegistry::with_defaults();
        assert_eq!(encoders.current().name(), "RAW");
        assert_eq!(encoders.names(), vec!["RAW", "MJPEG"]);

        assert!(encoders.select("mjpeg").is_some());
        assert_eq!(encoders.current().name(), "MJPEG");

        assert!(encoders.select("H264").is_none());
        assert_eq!(encoders.current().name(), "MJPEG");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut recorders = RecorderRegistry::with_defaults();
        recorders.register(Box::new(RawRecorder::new()));
        assert_eq!(recorders.names().len(), 1);
        assert_eq!(recorders.current().extension(), ".raw");
    }

    #[test]
    fn test_negotiates_every_strategy() {
        let mut encoders = EncoderRegistry::with_defaults();
        let accepted: Vec<bool> = encoders
            .iter_mut()
            .map(|encoder| encoder.set_pixel_format(PixelFormat::Bgr, 8))
            .collect();
        assert_eq!(accepted, vec![true, false]);
    }
}
