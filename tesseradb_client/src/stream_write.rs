//! Client-streaming writes: buffer, flush, half-close, summarize.

use data_types::{Code, Endpoint, Point, RequestContext, WriteError, WriteOk};
use rpc::{message, RpcError, WriteStream};
use tracing::debug;

/// A stream-write session bound to one table.
///
/// Amortizes RPC overhead across many small writes: [`write`](Self::write)
/// buffers locally, [`flush`](Self::flush) pushes the buffer into the
/// client-streaming channel, and [`completed`](Self::completed) half-closes
/// the stream and resolves with the server's aggregated [`WriteOk`].
///
/// `completed` consumes the session, so writing after completion does not
/// compile. A transport failure closes the session; later calls fail with
/// [`Code::ClientState`].
///
/// Backpressure follows the transport configuration: when the channel is
/// full, a flush either waits for capacity (`block_on_limit`) or fails fast
/// with a [`Code::FlowControl`] error.
#[derive(Debug)]
pub struct StreamWriter {
    table: String,
    database: String,
    stream: WriteStream,
    buf: Vec<Point>,
    block_on_limit: bool,
    closed: bool,
}

impl StreamWriter {
    pub(crate) fn new(
        table: impl Into<String>,
        database: impl Into<String>,
        stream: WriteStream,
        block_on_limit: bool,
    ) -> Self {
        Self {
            table: table.into(),
            database: database.into(),
            stream,
            buf: Vec::new(),
            block_on_limit,
            closed: false,
        }
    }

    /// The table this session is bound to.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The endpoint the session routes to.
    pub fn endpoint(&self) -> &Endpoint {
        self.stream.endpoint()
    }

    /// Buffer points without flushing.
    ///
    /// Points must target the session's table.
    pub fn write(
        &mut self,
        points: impl IntoIterator<Item = Point>,
    ) -> Result<(), WriteError> {
        self.ensure_open()?;
        for point in points {
            if point.table() != self.table {
                return Err(WriteError::new(
                    Code::ClientState,
                    format!(
                        "point for table \"{}\" on a stream-write session bound to \"{}\"",
                        point.table(),
                        self.table
                    ),
                )
                .with_failed(vec![point]));
            }
            self.buf.push(point);
        }
        Ok(())
    }

    /// Buffer points and flush.
    pub async fn write_and_flush(
        &mut self,
        points: impl IntoIterator<Item = Point>,
    ) -> Result<(), WriteError> {
        self.write(points)?;
        self.flush().await
    }

    /// Flush buffered points into the stream.
    pub async fn flush(&mut self) -> Result<(), WriteError> {
        self.ensure_open()?;
        if self.buf.is_empty() {
            return Ok(());
        }

        let points = std::mem::take(&mut self.buf);
        let req = message::WriteRequest {
            context: RequestContext::new(&self.database),
            points: points.clone(),
        };

        let result = if self.block_on_limit {
            self.stream.send(req).await
        } else {
            self.stream.try_send(req)
        };

        result.map_err(|e| {
            if matches!(e, RpcError::StreamClosed { .. }) {
                self.closed = true;
            }
            let endpoint = self.stream.endpoint().clone();
            WriteError::new(e.code(), e.to_string())
                .with_endpoint(endpoint)
                .with_failed(points)
                .with_source(e)
        })
    }

    /// Flush any remainder, half-close the stream, and wait for the
    /// server's final aggregated response.
    pub async fn completed(mut self) -> Result<WriteOk, WriteError> {
        self.flush().await?;

        let endpoint = self.stream.endpoint().clone();
        let resp = self.stream.finish().await.map_err(|e| {
            WriteError::new(e.code(), e.to_string())
                .with_endpoint(endpoint.clone())
                .with_source(e)
        })?;

        if !resp.header.is_success() {
            return Err(
                WriteError::new(resp.header.status(), resp.header.error)
                    .with_endpoint(endpoint),
            );
        }

        debug!(table = %self.table, success = resp.success, "stream-write session completed");
        Ok(WriteOk::new(resp.success, resp.failed, None))
    }

    fn ensure_open(&self) -> Result<(), WriteError> {
        if self.closed {
            return Err(WriteError::new(
                Code::ClientState,
                "stream-write session is closed",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rpc::mock::MockRpcClient;
    use rpc::{RpcClient, RpcContext};

    fn endpoint() -> Endpoint {
        Endpoint::new("10.0.0.1", 8831)
    }

    fn point(table: &str, ts: i64) -> Point {
        Point::builder(table)
            .timestamp(ts)
            .field("cpu", 0.5)
            .build()
            .unwrap()
    }

    async fn writer(mock: &MockRpcClient, block_on_limit: bool) -> StreamWriter {
        let stream = mock
            .write_stream(&endpoint(), &RpcContext::new("public"))
            .await
            .unwrap();
        StreamWriter::new("t", "public", stream, block_on_limit)
    }

    #[tokio::test]
    async fn buffered_writes_flush_once() {
        let mock = MockRpcClient::new();
        let mut writer = writer(&mock, true).await;

        writer.write([point("t", 1)]).unwrap();
        writer.write([point("t", 2)]).unwrap();
        assert_eq!(mock.stream_requests(), 0);

        writer.flush().await.unwrap();
        // Flushing an empty buffer is a no-op.
        writer.flush().await.unwrap();

        let ok = writer.completed().await.unwrap();
        assert_eq!(ok.success, 2);
        assert_eq!(mock.stream_requests(), 1);
    }

    #[tokio::test]
    async fn thousand_single_point_flushes_complete() {
        let mock = MockRpcClient::new().with_stream_capacity(4);
        let mut writer = writer(&mock, true).await;

        for ts in 0..1000 {
            writer.write_and_flush([point("t", ts)]).await.unwrap();
        }

        let ok = writer.completed().await.unwrap();
        assert_eq!(ok.success, 1000);
        assert_eq!(ok.failed, 0);
        assert_eq!(mock.stream_points(), 1000);
    }

    #[tokio::test]
    async fn wrong_table_is_rejected() {
        let mock = MockRpcClient::new();
        let mut writer = writer(&mock, true).await;

        let err = writer.write([point("other", 1)]).unwrap_err();
        assert_eq!(err.code, Code::ClientState);
        assert_eq!(err.failed.len(), 1);

        // The session stays usable for its own table.
        writer.write_and_flush([point("t", 1)]).await.unwrap();
        assert_eq!(writer.completed().await.unwrap().success, 1);
    }

    #[tokio::test]
    async fn aborted_stream_fails_completion_and_later_writes() {
        let mock = MockRpcClient::new().with_stream_error(RpcError::Unavailable {
            endpoint: endpoint(),
        });
        let mut writer = writer(&mock, true).await;

        writer.write_and_flush([point("t", 1)]).await.unwrap();
        let err = writer.completed().await.unwrap_err();
        assert_eq!(err.code, Code::Unavailable);
    }

    #[tokio::test]
    async fn fail_fast_backpressure_surfaces_flow_control() {
        // Capacity 1 and no consumer pulling fast enough is hard to arrange
        // deterministically through the aggregating mock, so drive the
        // rpc-level handle directly: fill the channel, then observe the
        // fail-fast path.
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let (_done_tx, done_rx) = tokio::sync::oneshot::channel();
        let stream = WriteStream::new(endpoint(), tx, done_rx);
        let mut writer = StreamWriter::new("t", "public", stream, false);

        writer.write_and_flush([point("t", 1)]).await.unwrap();
        let err = writer
            .write_and_flush([point("t", 2)])
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::FlowControl);
        assert_eq!(err.failed.len(), 1);

        // Flow control does not close the session; the failed points may be
        // resent once capacity frees up.
        writer.write([point("t", 3)]).unwrap();
    }

    #[tokio::test]
    async fn flush_after_transport_death_closes_the_session() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let (_done_tx, done_rx) = tokio::sync::oneshot::channel();
        let stream = WriteStream::new(endpoint(), tx, done_rx);
        let mut writer = StreamWriter::new("t", "public", stream, true);
        drop(rx);

        let err = writer.write_and_flush([point("t", 1)]).await.unwrap_err();
        assert_eq!(err.code, Code::ClientState);
        assert_eq!(err.failed.len(), 1);

        let err = writer.write([point("t", 2)]).unwrap_err();
        assert_eq!(err.code, Code::ClientState);
        assert_matches!(
            writer.flush().await,
            Err(WriteError {
                code: Code::ClientState,
                ..
            })
        );
    }
}
