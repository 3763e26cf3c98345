use crate::error::OtaError;
use crate::firmware::check_size;
use crate::progress::ProgressReporter;
use crate::transport::{ota_uuids, OtaTransport, WriteMode, ATT_WRITE_OVERHEAD};
use std::future::Future;

/// Data chunk size, kept below the 247 byte MTU the peripheral negotiates
pub const CHUNK_SIZE: usize = 240;

/// Progress is reported on multiples of this percentage
const MILESTONE_STEP: u8 = 5;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OtaState {
    Idle,
    Handshaking,
    Streaming,
    Completed,
    Failed,
}

fn percent(offset: usize, size: usize) -> u8 {
    (offset as u64 * 100 / size as u64) as u8
}

/// One transfer attempt over an already connected transport.
///
/// The peripheral expects a single contiguous stream per connection: the image
/// size is announced with an acknowledged write, then the image follows as
/// unacknowledged chunks in offset order. The peripheral infers completion from
/// the byte count, so nothing is sent after the last chunk.
pub struct OtaSession<'a, T: OtaTransport> {
    transport: &'a T,
    image: &'a [u8],
    chunk_size: usize,
    offset: usize,
    last_milestone: Option<u8>,
    state: OtaState,
}

impl<'a, T: OtaTransport> OtaSession<'a, T> {
    pub fn new(transport: &'a T, image: &'a [u8], chunk_size: usize) -> Self {
        OtaSession {
            transport,
            image,
            chunk_size,
            offset: 0,
            last_milestone: None,
            state: OtaState::Idle,
        }
    }

    async fn check_chunk_size(&self) -> Result<(), OtaError> {
        let max = self.transport.mtu().await.saturating_sub(ATT_WRITE_OVERHEAD);
        if self.chunk_size == 0 || self.chunk_size > max {
            return Err(OtaError::InvalidChunkSize {
                chunk_size: self.chunk_size,
                max,
            });
        }
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), OtaError> {
        let size = check_size(self.image.len())?;
        self.check_chunk_size().await?;

        self.state = OtaState::Handshaking;
        tracing::info!("Announcing image size of {} bytes", size);
        self.transport
            .write(ota_uuids::SIZE, &size.to_le_bytes(), WriteMode::WithResponse)
            .await
            .map_err(OtaError::HandshakeFailed)?;
        self.state = OtaState::Streaming;
        Ok(())
    }

    fn report_progress(&mut self, reporter: &mut dyn ProgressReporter) {
        let percent = percent(self.offset, self.image.len());
        if percent % MILESTONE_STEP != 0 {
            return;
        }
        if self.last_milestone.map_or(true, |last| percent > last) {
            self.last_milestone = Some(percent);
            reporter.milestone(percent);
        }
    }

    async fn send_next_chunk(&mut self, reporter: &mut dyn ProgressReporter) -> Result<(), OtaError> {
        let image = self.image;
        let offset = self.offset;
        let end = usize::min(offset + self.chunk_size, image.len());

        self.transport
            .write(ota_uuids::DATA, &image[offset..end], WriteMode::WithoutResponse)
            .await
            .map_err(|source| OtaError::ChunkWriteFailed { offset, source })?;

        self.offset = end;
        self.report_progress(reporter);
        if self.offset == image.len() {
            self.state = OtaState::Completed;
        }
        Ok(())
    }

    async fn transfer(&mut self, reporter: &mut dyn ProgressReporter) -> Result<(), OtaError> {
        self.handshake().await?;

        reporter.started(self.image.len());
        self.report_progress(reporter);
        while self.state == OtaState::Streaming {
            self.send_next_chunk(reporter).await?;
        }
        reporter.completed(self.image.len());
        Ok(())
    }

    async fn drive(&mut self, reporter: &mut dyn ProgressReporter) -> Result<(), OtaError> {
        let result = self.transfer(reporter).await;
        if result.is_err() {
            self.state = OtaState::Failed;
        }
        result
    }

    /// Drive the session to `Completed` or `Failed`
    pub async fn run(mut self, reporter: &mut dyn ProgressReporter) -> Result<(), OtaError> {
        let result = self.drive(reporter).await;
        tracing::debug!("Session ended {:?} at offset {}", self.state, self.offset);
        result
    }
}

/// Upload `image` to the peripheral behind `transport`
pub async fn ota_run(
    transport: &impl OtaTransport,
    image: &[u8],
    chunk_size: usize,
    reporter: &mut dyn ProgressReporter,
) -> Result<(), OtaError> {
    OtaSession::new(transport, image, chunk_size).run(reporter).await
}

/// Run a transfer until it ends or `cancel` resolves, then release the link
/// whatever the outcome
pub async fn upload(
    transport: &impl OtaTransport,
    image: &[u8],
    chunk_size: usize,
    reporter: &mut dyn ProgressReporter,
    cancel: impl Future,
) -> Result<(), OtaError> {
    let result = tokio::select! {
        r = ota_run(transport, image, chunk_size, reporter) => r,
        _ = cancel => Err(OtaError::Cancelled),
    };

    if let Err(e) = transport.disconnect().await {
        tracing::warn!("Failed to disconnect: {}", e);
    }
    result
}
