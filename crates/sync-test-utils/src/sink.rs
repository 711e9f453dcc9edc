//! Frame sink that records what a participant would receive.

use async_trait::async_trait;
use sync_service::errors::SyncError;
use sync_service::model::frames::ServerFrame;
use sync_service::transport::FrameSink;
use tokio::sync::mpsc;

/// Forwards every frame to a channel; closing the sink ends the stream.
#[derive(Debug)]
pub struct RecordingSink {
    frames: Option<mpsc::UnboundedSender<ServerFrame>>,
}

impl RecordingSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { frames: Some(tx) }, rx)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, frame: ServerFrame) -> Result<(), SyncError> {
        if let Some(frames) = &self.frames {
            let _ = frames.send(frame);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.frames = None;
    }
}
