use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::transport::{FrameProcessor, FrameTransport, TransportId};
use crate::util::buf_ext::{BufMutExt, U24_MAX};

const LENGTH_PREFIX_LEN: usize = 3;

/// Reads a frame with a u24 length prefix. Returns `None` at the end of the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Option<Bytes>> {
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = ((len_buf[0] as usize) << 16) | ((len_buf[1] as usize) << 8) | (len_buf[2] as usize);
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf.freeze()))
}

/// Writes a frame with a u24 length prefix
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Bytes) -> anyhow::Result<()> {
    if frame.len() > U24_MAX {
        bail!("frame of {} bytes exceeds the maximum frame length", frame.len());
    }
    let mut prefix = BytesMut::with_capacity(LENGTH_PREFIX_LEN);
    prefix.put_u24(frame.len() as u32);
    writer.write_all(&prefix).await?;
    writer.write_all(frame).await?;
    Ok(())
}


/// Releases a [FramedTransport]'s reader. Dropping it without opening stops the reader.
pub struct ReadGate(oneshot::Sender<()>);

impl ReadGate {
    pub fn open(self) {
        let _ = self.0.send(());
    }
}


/// [FrameTransport] over an ordered byte stream (e.g. TCP), with frames delimited by a u24 length
///  prefix. A reader task passes inbound frames to a [FrameProcessor], a writer task writes
///  outbound frames in order.
///
/// The reader starts when the returned [ReadGate] is opened, so that the transport can be handed
///  to its connection before the first inbound frame is processed.
pub struct FramedTransport {
    id: TransportId,
    sender: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    reader_task: JoinHandle<()>,
}

impl FramedTransport {
    pub fn spawn<R, W>(reader: R, writer: W, processor: Arc<dyn FrameProcessor>) -> (FramedTransport, ReadGate)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = TransportId::next();
        let (sender, receiver) = mpsc::unbounded_channel();
        let (gate_sender, gate) = oneshot::channel();

        tokio::spawn(Self::write_loop(id, writer, receiver, processor.clone()));
        let reader_task = tokio::spawn(Self::read_loop(id, reader, gate, processor));

        let transport = FramedTransport {
            id,
            sender: Mutex::new(Some(sender)),
            reader_task,
        };
        (transport, ReadGate(gate_sender))
    }

    async fn read_loop<R: AsyncRead + Unpin>(id: TransportId, mut reader: R, gate: oneshot::Receiver<()>, processor: Arc<dyn FrameProcessor>) {
        if gate.await.is_err() {
            debug!("{}: read gate dropped, not reading", id);
            return;
        }
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    trace!("{}: received frame of {} bytes", id, frame.len());
                    if processor.process_frame(id, frame).is_err() {
                        debug!("{}: connection is gone, stop reading", id);
                        return;
                    }
                }
                Ok(None) => {
                    debug!("{}: end of stream", id);
                    processor.on_terminal(id, None);
                    return;
                }
                Err(e) => {
                    warn!("{}: read failed: {}", id, e);
                    processor.on_terminal(id, Some(e.to_string()));
                    return;
                }
            }
        }
    }

    async fn write_loop<W: AsyncWrite + Unpin>(id: TransportId, mut writer: W, mut receiver: mpsc::UnboundedReceiver<Bytes>, processor: Arc<dyn FrameProcessor>) {
        while let Some(frame) = receiver.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!("{}: write failed: {}", id, e);
                processor.on_terminal(id, Some(e.to_string()));
                return;
            }
        }
        trace!("{}: closed, shutting down writer", id);
        let _ = writer.shutdown().await;
    }
}

impl FrameTransport for FramedTransport {
    fn transport_id(&self) -> TransportId {
        self.id
    }

    fn output_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        let lock = self.sender.lock()
            .unwrap_or_else(|e| e.into_inner());
        match lock.as_ref() {
            Some(sender) => Ok(sender.send(frame)?),
            None => bail!("{} is closed", self.id),
        }
    }

    fn close(&self) {
        let sender = self.sender.lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if sender.is_some() {
            debug!("closing {}", self.id);
        }
        self.reader_task.abort();
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
