//! Transport bridge to the serial device.
//!
//! The device speaks newline-terminated text in both directions. A
//! [`Bridge`] performs one request/reply exchange at a time: write the
//! request line, flush, then read until a chunk containing a newline
//! arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

use crate::config::SerialConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Size of a single read from the device.
const READ_CHUNK: usize = 128;

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared handle to the serial connection.
///
/// Clones share the same connection. Each [`Bridge::send`] holds the
/// connection for its whole write and read, so replies can't be mixed up
/// between concurrent callers.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Mutex<Option<Connection>>>,
    read_timeout: Duration,
    // Cancelled when shutdown has to take the connection from an in-flight
    // exchange.
    closing: CancellationToken,
}

struct Connection {
    reader: Reader,
    writer: Writer,
}

impl Bridge {
    /// Open the serial port described by `config`.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let stream = tokio_serial::new(config.port.as_str(), config.baud_rate)
            .timeout(config.read_timeout)
            .open_native_async()
            .map_err(Error::Open)?;

        info!(
            port = %config.port,
            baud_rate = config.baud_rate,
            "Opened serial port."
        );
        Ok(Self::new(stream, config.read_timeout))
    }

    /// Wrap an already-open byte stream.
    ///
    /// `read_timeout` bounds each individual read, not the whole reply.
    pub fn new<S>(stream: S, read_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = io::split(stream);
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            inner: Arc::new(Mutex::new(Some(Connection {
                reader: BufReader::with_capacity(READ_CHUNK, reader),
                writer: Box::new(writer),
            }))),
            read_timeout,
            closing: CancellationToken::new(),
        }
    }

    /// Send `message` as one line and wait for the device's reply line.
    ///
    /// The reply has surrounding whitespace, including the terminating
    /// newline, trimmed. Once started, the exchange runs until a newline
    /// arrives or a read fails or times out; nothing is retried. The only
    /// exception is shutdown giving up on the drain in
    /// [`close_with`](Self::close_with), which ends the exchange with
    /// [`Error::Closed`].
    pub async fn send(&self, message: &str) -> Result<String> {
        let mut guard = self.inner.lock().await;
        let conn = guard.as_mut().ok_or(Error::Closed)?;

        tokio::select! {
            biased;
            _ = self.closing.cancelled() => Err(Error::Closed),
            result = conn.exchange(message, self.read_timeout) => result,
        }
    }

    /// Write a final line without waiting for a reply, then release the
    /// connection.
    ///
    /// Waits up to `drain` for an in-flight [`send`](Self::send) to finish,
    /// and up to `drain` again for the write itself. If the first wait runs
    /// out, the in-flight exchange is cut short, nothing is written and
    /// [`Error::Busy`] is returned. The connection is released in every
    /// case.
    pub async fn close_with(&self, line: &str, drain: Duration) -> Result<()> {
        let mut guard = match time::timeout(drain, self.inner.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.closing.cancel();
                if self.inner.lock().await.take().is_some() {
                    debug!("Serial connection closed.");
                }
                return Err(Error::Busy);
            }
        };

        let result = match guard.as_mut() {
            Some(conn) => match time::timeout(drain, conn.write_line(line)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Write(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write timed out",
                ))),
            },
            None => Err(Error::Closed),
        };

        if guard.take().is_some() {
            debug!("Serial connection closed.");
        }
        result
    }

    /// Release the connection. Later sends fail with [`Error::Closed`].
    pub async fn close(&self) {
        if self.inner.lock().await.take().is_some() {
            debug!("Serial connection closed.");
        }
    }

    /// Whether the connection has been released by [`close`](Self::close)
    /// or [`close_with`](Self::close_with).
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl Connection {
    async fn exchange(&mut self, message: &str, read_timeout: Duration) -> Result<String> {
        self.write_line(message).await?;
        self.read_reply(read_timeout).await
    }

    async fn write_line(&mut self, data: &str) -> Result<()> {
        debug!("writing '{}'", data);

        let mut line = Vec::with_capacity(data.len() + 1);
        line.extend_from_slice(data.as_bytes());
        line.push(b'\n');

        self.writer.write_all(&line).await.map_err(Error::Write)?;
        self.writer.flush().await.map_err(Error::Flush)
    }

    // Reads whole chunks; the first chunk containing a newline ends the
    // reply, including any bytes that follow the newline in that chunk.
    async fn read_reply(&mut self, read_timeout: Duration) -> Result<String> {
        trace!("reading");

        let mut raw = Vec::new();
        loop {
            let chunk = match time::timeout(read_timeout, self.reader.fill_buf()).await {
                Ok(Ok(chunk)) => chunk,
                Ok(Err(e)) => return Err(Error::Read(e)),
                Err(_) => {
                    let partial = String::from_utf8_lossy(&raw).into_owned();
                    debug!(partial = %partial.trim(), "Read timed out.");
                    return Err(Error::ReadTimeout { partial });
                }
            };

            if chunk.is_empty() {
                return Err(Error::Eof);
            }

            let len = chunk.len();
            let done = chunk.contains(&b'\n');
            raw.extend_from_slice(chunk);
            self.reader.consume(len);

            if done {
                break;
            }
        }

        let reply = String::from_utf8_lossy(&raw).trim().to_string();
        debug!("read '{}'", reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn bridge() -> (Bridge, DuplexStream) {
        let (host, device) = io::duplex(1024);
        (Bridge::new(host, TIMEOUT), device)
    }

    async fn expect_line(device: &mut DuplexStream, expected: &str) {
        let mut buf = vec![0u8; expected.len()];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[tokio::test]
    async fn writes_line_then_returns_trimmed_reply() {
        let (bridge, mut device) = bridge();

        let device_task = tokio::spawn(async move {
            expect_line(&mut device, "voltage0\n").await;
            device.write_all(b"12.3\n").await.unwrap();
            device
        });

        let reply = bridge.send("voltage0").await.unwrap();
        assert_eq!(reply, "12.3");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn stale_bytes_join_the_reply() {
        let (bridge, mut device) = bridge();

        // Bytes already waiting on the line are read after the request goes
        // out and become part of the reply.
        device.write_all(b"  ").await.unwrap();
        let device_task = tokio::spawn(async move {
            expect_line(&mut device, "ping\n").await;
            device.write_all(b"pong\r\n").await.unwrap();
            device
        });

        assert_eq!(bridge.send("ping").await.unwrap(), "pong");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn reply_split_across_reads() {
        let (bridge, mut device) = bridge();

        let device_task = tokio::spawn(async move {
            expect_line(&mut device, "status\n").await;
            device.write_all(b"  all").await.unwrap();
            tokio::task::yield_now().await;
            device.write_all(b" good").await.unwrap();
            tokio::task::yield_now().await;
            device.write_all(b"\r\n").await.unwrap();
            device
        });

        assert_eq!(bridge.send("status").await.unwrap(), "all good");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn newline_chunk_is_taken_whole() {
        let (bridge, mut device) = bridge();

        let device_task = tokio::spawn(async move {
            expect_line(&mut device, "q\n").await;
            device.write_all(b"a\nb").await.unwrap();
            device
        });

        assert_eq!(bridge.send("q").await.unwrap(), "a\nb");
        device_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (bridge, mut device) = bridge();

        let device_task = tokio::spawn(async move {
            expect_line(&mut device, "voltage0\n").await;
            device
        });

        let err = bridge.send("voltage0").await.unwrap_err();
        assert!(matches!(err, Error::ReadTimeout { ref partial } if partial.is_empty()));
        assert_eq!(err.to_string(), "read timed out");
        drop(device_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_partial_reply() {
        let (bridge, mut device) = bridge();

        let device_task = tokio::spawn(async move {
            expect_line(&mut device, "voltage0\n").await;
            device.write_all(b"12.").await.unwrap();
            device
        });

        match bridge.send("voltage0").await {
            Err(Error::ReadTimeout { partial }) => assert_eq!(partial, "12."),
            other => panic!("expected timeout, got {:?}", other),
        }
        drop(device_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_applies_per_read() {
        let (bridge, mut device) = bridge();

        // Each byte arrives within the timeout even though the whole reply
        // takes longer than one timeout period.
        let device_task = tokio::spawn(async move {
            expect_line(&mut device, "slow\n").await;
            for b in b"abc\n" {
                time::sleep(Duration::from_millis(600)).await;
                device.write_all(&[*b]).await.unwrap();
            }
            device
        });

        assert_eq!(bridge.send("slow").await.unwrap(), "abc");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn device_hangup_mid_reply() {
        let (bridge, mut device) = bridge();

        tokio::spawn(async move {
            expect_line(&mut device, "x\n").await;
            device.write_all(b"12").await.unwrap();
        });

        let err = bridge.send("x").await.unwrap_err();
        assert!(matches!(err, Error::Eof), "{err:?}");
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let (bridge, device) = bridge();
        drop(device);

        let err = bridge.send("voltage0").await.unwrap_err();
        assert!(matches!(err, Error::Write(_)), "{err:?}");
        assert!(err.to_string().starts_with("write failed"));
    }

    #[tokio::test]
    async fn concurrent_sends_get_their_own_replies() {
        let (bridge, device) = bridge();

        // Echo each request line back, prefixed.
        tokio::spawn(async move {
            let (rx, mut tx) = io::split(device);
            let mut lines = BufReader::new(rx).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                tx.write_all(format!("echo:{line}\n").as_bytes())
                    .await
                    .unwrap();
            }
        });

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let bridge = bridge.clone();
                tokio::spawn(async move { (i, bridge.send(&format!("m{i}")).await) })
            })
            .collect();

        for task in tasks {
            let (i, reply) = task.await.unwrap();
            assert_eq!(reply.unwrap(), format!("echo:m{i}"));
        }
    }

    #[tokio::test]
    async fn close_with_writes_line_and_releases() {
        let (bridge, mut device) = bridge();

        bridge.close_with("bye", TIMEOUT).await.unwrap();
        expect_line(&mut device, "bye\n").await;
        assert!(bridge.is_closed().await);

        let err = bridge.send("voltage0").await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn close_with_ignores_missing_device() {
        let (bridge, device) = bridge();
        drop(device);

        assert!(bridge.close_with("bye", TIMEOUT).await.is_err());
        assert!(bridge.is_closed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_with_cuts_stuck_exchange_short() {
        let (host, mut device) = io::duplex(1024);
        let bridge = Bridge::new(host, Duration::from_secs(30));

        let in_flight = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.send("status").await }
        });
        expect_line(&mut device, "status\n").await;

        let err = bridge
            .close_with("bye", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy), "{err:?}");
        assert!(bridge.is_closed().await);
        assert!(matches!(in_flight.await.unwrap(), Err(Error::Closed)));

        // The port was dropped without the final line.
        let mut rest = Vec::new();
        device.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (bridge, _device) = bridge();

        bridge.close().await;
        bridge.close().await;
        assert!(bridge.is_closed().await);
        assert!(matches!(
            bridge.close_with("bye", TIMEOUT).await,
            Err(Error::Closed)
        ));
    }
}
