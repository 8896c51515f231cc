//! Directional pump

use std::fmt;
use std::io;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{FrameRead, FrameWrite};

/// Upper bound for releasing a sink after its pump stopped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Direction of a pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Interface → channel
    Egress,
    /// Channel → interface
    Ingress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Egress => write!(f, "egress"),
            Direction::Ingress => write!(f, "ingress"),
        }
    }
}

/// Terminal failure of one pump
#[derive(Debug)]
pub enum PumpFailure {
    Read(io::Error),
    Write(io::Error),
    /// Zero-length read; not distinguishable from a broken stream
    Closed,
}

impl fmt::Display for PumpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpFailure::Read(e) => write!(f, "read failed: {}", e),
            PumpFailure::Write(e) => write!(f, "write failed: {}", e),
            PumpFailure::Closed => write!(f, "stream closed"),
        }
    }
}

/// Why a pump stopped
#[derive(Debug)]
pub enum PumpExit {
    /// The session token was cancelled
    Cancelled,
    Failed(PumpFailure),
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpExit::Cancelled => write!(f, "cancelled"),
            PumpExit::Failed(failure) => write!(f, "{}", failure),
        }
    }
}

/// Move frames from `reader` to `writer` until failure or cancellation
pub(super) async fn run<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    mtu: usize,
    cancel: &CancellationToken,
) -> PumpExit
where
    R: FrameRead,
    W: FrameWrite,
{
    let mut buf = vec![0u8; mtu];
    let mut frames: u64 = 0;
    let mut bytes: u64 = 0;

    let exit = loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => break PumpExit::Cancelled,
            result = reader.read_frame(&mut buf) => match result {
                Ok(0) => break PumpExit::Failed(PumpFailure::Closed),
                Ok(n) => n,
                Err(e) => break PumpExit::Failed(PumpFailure::Read(e)),
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break PumpExit::Cancelled,
            result = writer.write_frame(&buf[..n]) => {
                if let Err(e) = result {
                    break PumpExit::Failed(PumpFailure::Write(e));
                }
            }
        }

        frames += 1;
        bytes += n as u64;
        tracing::trace!("{} frame of {} bytes", direction, n);
    };

    // Stop the sibling pump as well
    cancel.cancel();

    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("{} sink close failed: {}", direction, e),
        Err(_) => tracing::debug!("{} sink close timed out", direction),
    }

    tracing::debug!(
        "{} pump stopped after {} frames ({} bytes): {}",
        direction,
        frames,
        bytes,
        exit
    );
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Script(Vec<io::Result<Vec<u8>>>);

    #[async_trait]
    impl FrameRead for Script {
        async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.remove(0) {
                Ok(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                Err(e) => Err(e),
            }
        }
    }

    #[derive(Default)]
    struct Collect {
        frames: Vec<Vec<u8>>,
        fail_after: Option<usize>,
        closed: bool,
    }

    #[async_trait]
    impl<'a> FrameWrite for &'a mut Collect {
        async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            if Some(self.frames.len()) == self.fail_after {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_zero_length_read_is_a_failure() {
        let reader = Script(vec![Ok(b"one".to_vec()), Ok(b"two".to_vec()), Ok(Vec::new())]);
        let mut sink = Collect::default();
        let cancel = CancellationToken::new();

        let exit = run(Direction::Egress, reader, &mut sink, 1500, &cancel).await;

        assert!(matches!(exit, PumpExit::Failed(PumpFailure::Closed)));
        assert_eq!(sink.frames, vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(sink.closed);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let reader = Script(vec![Err(io::Error::from(io::ErrorKind::ConnectionReset))]);
        let mut sink = Collect::default();
        let cancel = CancellationToken::new();

        let exit = run(Direction::Ingress, reader, &mut sink, 1500, &cancel).await;

        match exit {
            PumpExit::Failed(PumpFailure::Read(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("unexpected exit: {}", other),
        }
    }

    #[tokio::test]
    async fn test_write_error_is_terminal() {
        let reader = Script(vec![
            Ok(b"a".to_vec()),
            Ok(b"b".to_vec()),
            Ok(b"c".to_vec()),
        ]);
        let mut sink = Collect {
            fail_after: Some(1),
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        let exit = run(Direction::Egress, reader, &mut sink, 1500, &cancel).await;

        assert!(matches!(exit, PumpExit::Failed(PumpFailure::Write(_))));
        assert_eq!(sink.frames, vec![b"a".to_vec()]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_read() {
        let reader = Script(vec![Ok(b"never".to_vec())]);
        let mut sink = Collect::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = run(Direction::Ingress, reader, &mut sink, 1500, &cancel).await;

        assert!(matches!(exit, PumpExit::Cancelled));
        assert!(sink.frames.is_empty());
    }
}
