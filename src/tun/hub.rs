//! Shared interface hub
//!
//! The server has one TUN device and any number of sessions. The hub is the
//! single point that touches the device: one reader task feeds a bounded
//! queue that session egress pumps take frames from (first waiting session
//! wins), and one writer task drains a bounded queue that every session
//! ingress pump feeds.
//!
//! Transient read errors are skipped. Any other read failure stops the hub
//! for good and is reported through [`InterfaceHub::failed`].

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::relay::{FrameRead, FrameWrite, VirtualInterface};

/// Owner of the shared device's reader and writer tasks
pub struct InterfaceHub {
    inbound: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    failed: CancellationToken,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl InterfaceHub {
    /// Take ownership of `device` and start the reader and writer tasks
    pub fn start<I>(device: I, mtu: usize, queue_depth: usize, cancel: CancellationToken) -> Self
    where
        I: VirtualInterface,
    {
        let (mut reader, mut writer) = device.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(queue_depth);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(queue_depth);

        let failed = CancellationToken::new();
        let reader_failed = failed.clone();
        let reader_cancel = cancel.clone();
        let reader_task = tokio::spawn(async move {
            let mut buf = vec![0u8; mtu];
            loop {
                let n = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    result = reader.read_frame(&mut buf) => match result {
                        Ok(0) => {
                            tracing::error!("Interface returned an empty read, stopping hub reader");
                            reader_failed.cancel();
                            break;
                        }
                        Ok(n) => n,
                        Err(e) if is_transient(&e) => {
                            tracing::debug!("Transient interface read error: {}", e);
                            continue;
                        }
                        Err(e) => {
                            tracing::error!("Interface read failed, stopping hub reader: {}", e);
                            reader_failed.cancel();
                            break;
                        }
                    },
                };

                let frame = Bytes::copy_from_slice(&buf[..n]);
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    sent = inbound_tx.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Hub reader stopped");
        });

        let writer_cancel = cancel.clone();
        let writer_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                // One bad packet must not stop delivery for everyone else
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::debug!("Interface write of {} bytes failed: {}", frame.len(), e);
                }
            }
            tracing::debug!("Hub writer stopped");
        });

        Self {
            inbound: Arc::new(Mutex::new(inbound_rx)),
            outbound: outbound_tx,
            cancel,
            failed,
            reader_task,
            writer_task,
        }
    }

    /// A new session-facing port onto the shared device
    pub fn port(&self) -> InterfacePort {
        InterfacePort {
            inbound: Arc::clone(&self.inbound),
            outbound: self.outbound.clone(),
        }
    }

    /// Completes once the device can no longer be read.
    ///
    /// Not triggered by [`InterfaceHub::shutdown`].
    pub async fn failed(&self) {
        self.failed.cancelled().await
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_cancelled()
    }

    /// Stop both tasks and wait for them
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.reader_task.await;
        let _ = self.writer_task.await;
    }
}

/// One session's view of the shared device
#[derive(Clone)]
pub struct InterfacePort {
    inbound: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    outbound: mpsc::Sender<Bytes>,
}

pub struct PortReader {
    inbound: Arc<Mutex<mpsc::Receiver<Bytes>>>,
}

pub struct PortWriter {
    outbound: mpsc::Sender<Bytes>,
}

impl VirtualInterface for InterfacePort {
    type Reader = PortReader;
    type Writer = PortWriter;

    fn into_split(self) -> (PortReader, PortWriter) {
        (
            PortReader {
                inbound: self.inbound,
            },
            PortWriter {
                outbound: self.outbound,
            },
        )
    }
}

/// Errors a TUN read can hit without the device being gone
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    ) || e.raw_os_error() == Some(libc::ENOBUFS)
}

fn hub_stopped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "interface hub stopped")
}

#[async_trait]
impl FrameRead for PortReader {
    async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame = self.inbound.lock().await.recv().await.ok_or_else(hub_stopped)?;
        let n = frame.len().min(buf.len());
        if n < frame.len() {
            tracing::debug!("Truncating {} byte frame to {} bytes", frame.len(), n);
        }
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }
}

#[async_trait]
impl FrameWrite for PortWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.outbound
            .send(Bytes::copy_from_slice(frame))
            .await
            .map_err(|_| hub_stopped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::memory_interface;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_ports_fan_in_to_device() {
        let (iface, mut device) = memory_interface(4096);
        let hub = InterfaceHub::start(iface, 1500, 8, CancellationToken::new());

        let (_, mut a) = hub.port().into_split();
        let (_, mut b) = hub.port().into_split();
        a.write_frame(b"from-a").await.unwrap();
        b.write_frame(b"from-b").await.unwrap();

        let mut buf = [0u8; 12];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from-afrom-b");

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_each_device_frame_goes_to_one_port() {
        let (iface, mut device) = memory_interface(4096);
        let hub = InterfaceHub::start(iface, 1500, 8, CancellationToken::new());

        let (mut a, _) = hub.port().into_split();
        let (mut b, _) = hub.port().into_split();

        device.write_all(b"first").await.unwrap();
        let mut buf = [0u8; 1500];
        let n = a.read_frame(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");

        device.write_all(b"second").await.unwrap();
        let n = b.read_frame(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_ports_fail_once_device_is_gone() {
        let (iface, device) = memory_interface(4096);
        let hub = InterfaceHub::start(iface, 1500, 8, CancellationToken::new());
        let (mut reader, _) = hub.port().into_split();

        // Device EOF stops the reader task, which drops the inbound sender
        drop(device);
        let mut buf = [0u8; 1500];
        let err = reader.read_frame(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        tokio::time::timeout(std::time::Duration::from_secs(5), hub.failed())
            .await
            .expect("hub must report the dead device");
        hub.shutdown().await;
    }

    struct Flaky(Vec<io::Result<Vec<u8>>>);

    #[async_trait]
    impl FrameRead for Flaky {
        async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return std::future::pending().await;
            }
            let frame = self.0.remove(0)?;
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(frame.len())
        }
    }

    struct Discard;

    #[async_trait]
    impl FrameWrite for Discard {
        async fn write_frame(&mut self, _frame: &[u8]) -> io::Result<()> {
            Ok(())
        }
    }

    struct FlakyDevice(Vec<io::Result<Vec<u8>>>);

    impl VirtualInterface for FlakyDevice {
        type Reader = Flaky;
        type Writer = Discard;

        fn into_split(self) -> (Flaky, Discard) {
            (Flaky(self.0), Discard)
        }
    }

    #[tokio::test]
    async fn test_transient_read_errors_are_skipped() {
        let device = FlakyDevice(vec![
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Err(io::Error::from_raw_os_error(libc::ENOBUFS)),
            Ok(b"after".to_vec()),
            Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Ok(b"again".to_vec()),
        ]);
        let hub = InterfaceHub::start(device, 1500, 8, CancellationToken::new());
        let (mut reader, _) = hub.port().into_split();

        let mut buf = [0u8; 1500];
        let n = reader.read_frame(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"after");
        let n = reader.read_frame(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"again");
        assert!(!hub.is_failed());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_hard_read_error_marks_hub_failed() {
        let device = FlakyDevice(vec![
            Ok(b"last".to_vec()),
            Err(io::Error::from_raw_os_error(libc::EBADF)),
        ]);
        let hub = InterfaceHub::start(device, 1500, 8, CancellationToken::new());

        tokio::time::timeout(std::time::Duration::from_secs(5), hub.failed())
            .await
            .expect("hard read error must fail the hub");
        assert!(hub.is_failed());

        // Frames read before the failure are still delivered
        let (mut reader, _) = hub.port().into_split();
        let mut buf = [0u8; 1500];
        let n = reader.read_frame(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"last");

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_not_a_failure() {
        let (iface, _device) = memory_interface(4096);
        let hub = InterfaceHub::start(iface, 1500, 8, CancellationToken::new());
        let failed = hub.failed.clone();
        hub.shutdown().await;
        assert!(!failed.is_cancelled());
    }
}
