//! Relay Engine
//!
//! Moves packets between a virtual interface and a secure channel with two
//! independent pumps:
//!
//! - **Egress**: interface → channel
//! - **Ingress**: channel → interface
//!
//! Each pump owns one MTU-sized buffer and stops at its first failure. The
//! first pump to stop cancels the session token so its sibling is torn down
//! at the next suspension point. [`relay`] returns once both have stopped.

mod pump;

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

pub use pump::{Direction, PumpExit, PumpFailure};

/// Source of frames (one read = one frame, at most `buf.len()` bytes)
#[async_trait]
pub trait FrameRead: Send {
    async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Sink of frames
#[async_trait]
pub trait FrameWrite: Send {
    /// Write one whole frame
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Release the sink once its pump has stopped
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A virtual network interface endpoint that can be driven by the relay
pub trait VirtualInterface {
    type Reader: FrameRead + 'static;
    type Writer: FrameWrite + 'static;

    fn into_split(self) -> (Self::Reader, Self::Writer);
}

#[async_trait]
impl<S> FrameRead for ReadHalf<S>
where
    S: AsyncRead + Send,
{
    async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf).await
    }
}

#[async_trait]
impl<S> FrameWrite for WriteHalf<S>
where
    S: AsyncWrite + Send,
{
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.write_all(frame).await?;
        self.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

/// How both pumps of a session ended
#[derive(Debug)]
pub struct RelayOutcome {
    pub egress: PumpExit,
    pub ingress: PumpExit,
}

impl RelayOutcome {
    /// The failure that ended the session, if any pump failed
    pub fn first_failure(&self) -> Option<(Direction, &PumpFailure)> {
        match (&self.egress, &self.ingress) {
            (PumpExit::Failed(f), _) => Some((Direction::Egress, f)),
            (_, PumpExit::Failed(f)) => Some((Direction::Ingress, f)),
            _ => None,
        }
    }

    /// Both pumps stopped only because the session was cancelled
    pub fn was_cancelled(&self) -> bool {
        matches!(
            (&self.egress, &self.ingress),
            (PumpExit::Cancelled, PumpExit::Cancelled)
        )
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "egress {}, ingress {}", self.egress, self.ingress)
    }
}

/// Relay frames between `channel` and `interface` until both pumps stop.
///
/// `cancel` is the session token: cancelling it from outside tears the
/// session down, and either pump cancels it when it stops.
pub async fn relay<S, I>(
    channel: S,
    interface: I,
    mtu: usize,
    cancel: CancellationToken,
) -> RelayOutcome
where
    S: AsyncRead + AsyncWrite + Send,
    I: VirtualInterface,
{
    let (channel_reader, channel_writer) = tokio::io::split(channel);
    let (iface_reader, iface_writer) = interface.into_split();

    let (egress, ingress) = tokio::join!(
        pump::run(Direction::Egress, iface_reader, channel_writer, mtu, &cancel),
        pump::run(Direction::Ingress, channel_reader, iface_writer, mtu, &cancel),
    );

    RelayOutcome { egress, ingress }
}


#[cfg(test)]
mod tests {
    use super::testing::memory_interface;
    use super::*;
    use std::time::Duration;

    const MTU: usize = 1500;

    #[tokio::test]
    async fn test_frames_cross_in_both_directions() {
        let (channel, mut peer) = tokio::io::duplex(64 * 1024);
        let (iface, mut device) = memory_interface(64 * 1024);
        let cancel = CancellationToken::new();

        let session = tokio::spawn(relay(channel, iface, MTU, cancel.clone()));

        device.write_all(b"outbound packet").await.unwrap();
        let mut buf = [0u8; MTU];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"outbound packet");

        peer.write_all(b"inbound packet").await.unwrap();
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"inbound packet");

        cancel.cancel();
        let outcome = session.await.unwrap();
        assert!(outcome.was_cancelled());
        assert!(outcome.first_failure().is_none());
    }

    #[tokio::test]
    async fn test_order_preserved_within_a_direction() {
        let (channel, mut peer) = tokio::io::duplex(64 * 1024);
        let (iface, mut device) = memory_interface(64 * 1024);
        let cancel = CancellationToken::new();
        let session = tokio::spawn(relay(channel, iface, MTU, cancel.clone()));

        let mut expected = Vec::new();
        for i in 0..100u8 {
            let frame = vec![i; 1 + (i as usize * 13) % MTU];
            device.write_all(&frame).await.unwrap();
            expected.extend_from_slice(&frame);
        }

        let mut received = vec![0u8; expected.len()];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        cancel.cancel();
        session.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_close_ends_ingress_and_cancels_egress() {
        let (channel, peer) = tokio::io::duplex(64 * 1024);
        let (iface, _device) = memory_interface(64 * 1024);
        let cancel = CancellationToken::new();

        drop(peer);
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            relay(channel, iface, MTU, cancel.clone()),
        )
        .await
        .expect("relay must return once the channel is gone");

        assert!(matches!(
            outcome.ingress,
            PumpExit::Failed(PumpFailure::Closed)
        ));
        assert!(matches!(outcome.egress, PumpExit::Cancelled));
        assert!(matches!(
            outcome.first_failure(),
            Some((Direction::Ingress, PumpFailure::Closed))
        ));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_external_cancel_does_not_touch_parent() {
        let parent = CancellationToken::new();
        let session = parent.child_token();
        let (channel, _peer) = tokio::io::duplex(1024);
        let (iface, _device) = memory_interface(1024);

        session.cancel();
        let outcome = relay(channel, iface, MTU, session).await;
        assert!(outcome.was_cancelled());
        assert!(!parent.is_cancelled());
    }
}
