//! Where encoded preview frames go

use bytes::Bytes;
use flume::{Receiver, Sender, TrySendError};
use tracing::debug;

use crate::error::{Result, StreamError};

/// One encoded preview frame
#[derive(Debug, Clone)]
pub struct PreviewBlob {
    pub data: Bytes,
    /// Format tag understood by viewers, e.g. `.stream` or `.stream_jpg`
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Live-view channel to a remote client.
///
/// Implemented by the transport layer; called from the preview runner thread
/// only, never from the capture or worker threads.
pub trait PreviewSink: Send + Sync {
    fn send(&self, blob: PreviewBlob) -> Result<()>;
}

/// Forwards blobs over a bounded flume channel.
///
/// When the receiver falls behind, new blobs are dropped rather than queued.
pub struct ChannelSink {
    tx: Sender<PreviewBlob>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<PreviewBlob>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl PreviewSink for ChannelSink {
    fn send(&self, blob: PreviewBlob) -> Result<()> {
        match self.tx.try_send(blob) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("Preview receiver is behind, dropping blob");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(StreamError::Encoder("preview receiver disconnected".into()))
            }
        }
    }
}

/// Discards everything
pub struct NullSink;

impl PreviewSink for NullSink {
    fn send(&self, _blob: PreviewBlob) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(tag: &str) -> PreviewBlob {
        PreviewBlob {
            data: Bytes::from_static(b"abc"),
            format: tag.into(),
            width: 3,
            height: 1,
        }
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, rx) = ChannelSink::new(1);
        sink.send(blob("first")).unwrap();
        sink.send(blob("second")).unwrap();
        assert_eq!(rx.try_recv().unwrap().format, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_disconnected() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        assert!(sink.send(blob("x")).is_err());
    }
}
