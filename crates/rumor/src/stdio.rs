//! Line-delimited JSON transport.
//!
//! One envelope per line in each direction. The standard binary runs this
//! over stdin/stdout; tests run it over in-memory duplex pipes. Replies to
//! our own RPCs are routed to their waiters as lines are read, so `recv`
//! only ever returns requests.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace, warn};

use rumor_core::NodeId;
use rumor_sync::{Body, Envelope, ErrorCode, Payload, PendingReplies, SyncError, Transport};

use crate::error::{NodeError, Result};

/// The transport used by the `rumor-broadcast` binary.
pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

/// Envelopes as newline-terminated JSON over a reader/writer pair.
pub struct LineTransport<R, W> {
    node_id: NodeId,
    reader: AsyncMutex<R>,
    writer: AsyncMutex<W>,
    pending: PendingReplies,
}

impl StdioTransport {
    /// Complete the init handshake on this process's stdin/stdout.
    pub async fn from_stdio() -> Result<(Self, Vec<NodeId>)> {
        Self::handshake(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wait for `init`, answer `init_ok`, and return the transport along
    /// with the cluster membership the init message announced.
    ///
    /// Anything other than `init` as the first message is fatal: without
    /// it the node does not know its own ID.
    pub async fn handshake(mut reader: R, writer: W) -> Result<(Self, Vec<NodeId>)> {
        let Some(line) = next_text_line(&mut reader).await? else {
            return Err(NodeError::NotInitialized("input closed before init".into()));
        };
        let request =
            Envelope::decode(&line).map_err(|e| NodeError::NotInitialized(e.to_string()))?;

        let Body::Init { node_id, node_ids } = &request.body.body else {
            return Err(NodeError::NotInitialized(format!(
                "expected init, got {}",
                request.body.body.kind()
            )));
        };

        let transport = Self {
            node_id: node_id.clone(),
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            pending: PendingReplies::new(),
        };
        transport.reply(&request, Body::InitOk).await?;

        debug!(node = %node_id, members = node_ids.len(), "initialized");
        Ok((transport, node_ids.clone()))
    }

    /// RPCs still awaiting a reply.
    pub fn pending_rpcs(&self) -> usize {
        self.pending.len()
    }

    fn envelope(&self, dest: &NodeId, payload: Payload) -> Envelope {
        Envelope {
            src: self.node_id.clone(),
            dest: dest.clone(),
            body: payload,
        }
    }

    async fn write(&self, envelope: &Envelope) -> rumor_sync::Result<()> {
        let mut line = envelope
            .encode()
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SyncError::TransportError(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| SyncError::TransportError(e.to_string()))
    }

    /// Next non-blank line, or `None` at end of input.
    async fn read_line(&self) -> rumor_sync::Result<Option<String>> {
        let mut reader = self.reader.lock().await;
        next_text_line(&mut *reader)
            .await
            .map_err(|e| SyncError::TransportError(e.to_string()))
    }
}

/// Read up to the next non-blank line, without its line ending.
///
/// A line that is not valid UTF-8 is logged and skipped, the same as any
/// other undecodable line. `None` at end of input.
async fn next_text_line<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        let line = match String::from_utf8(std::mem::take(&mut buf)) {
            Ok(line) => line,
            Err(e) => {
                warn!(len = e.as_bytes().len(), "skipping line that is not UTF-8: {}", e.utf8_error());
                continue;
            }
        };
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        return Ok(Some(line.to_string()));
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn local_node_id(&self) -> NodeId {
        self.node_id.clone()
    }

    async fn send(&self, peer: &NodeId, body: Body) -> rumor_sync::Result<()> {
        let envelope = self.envelope(peer, Payload::new(body));
        self.write(&envelope).await
    }

    async fn rpc(&self, peer: &NodeId, body: Body, timeout: Duration) -> rumor_sync::Result<Body> {
        let (msg_id, rx) = self.pending.register();
        let envelope = self.envelope(
            peer,
            Payload {
                msg_id: Some(msg_id),
                in_reply_to: None,
                body,
            },
        );

        if let Err(e) = self.write(&envelope).await {
            self.pending.forget(msg_id);
            return Err(e);
        }

        self.pending.wait(msg_id, rx, peer, timeout).await
    }

    async fn reply(&self, request: &Envelope, body: Body) -> rumor_sync::Result<()> {
        let Some(in_reply_to) = request.body.msg_id else {
            trace!(to = %request.src, "request carried no msg_id; reply skipped");
            return Ok(());
        };
        let envelope = self.envelope(
            &request.src,
            Payload {
                msg_id: Some(self.pending.next_msg_id()),
                in_reply_to: Some(in_reply_to),
                body,
            },
        );
        self.write(&envelope).await
    }

    async fn recv(&self) -> rumor_sync::Result<Envelope> {
        loop {
            let Some(line) = self.read_line().await? else {
                return Err(SyncError::Closed);
            };

            let envelope = match Envelope::decode(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(node = %self.node_id, "{}", e);
                    if let (Some(src), Some(msg_id)) = (&e.src, e.msg_id) {
                        let error = self.envelope(
                            src,
                            Payload {
                                msg_id: Some(self.pending.next_msg_id()),
                                in_reply_to: Some(msg_id),
                                body: Body::error(ErrorCode::MalformedRequest, e.reason.clone()),
                            },
                        );
                        if let Err(write_err) = self.write(&error).await {
                            warn!(node = %self.node_id, to = %src, "could not report malformed request: {}", write_err);
                        }
                    }
                    continue;
                }
            };

            if let Some(in_reply_to) = envelope.body.in_reply_to {
                if !self.pending.resolve(in_reply_to, envelope.body.body) {
                    debug!(node = %self.node_id, from = %envelope.src, in_reply_to, "late or unknown reply dropped");
                }
                continue;
            }

            return Ok(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumor_core::Value;
    use std::sync::Arc;
    use tokio::io::{DuplexStream, Lines};

    type TestTransport = LineTransport<BufReader<DuplexStream>, DuplexStream>;

    struct Harness {
        transport: Arc<TestTransport>,
        /// Feeds the transport's input.
        input: DuplexStream,
        /// Reads the transport's output.
        output: Lines<BufReader<DuplexStream>>,
    }

    impl Harness {
        async fn write(&mut self, line: &str) {
            self.input.write_all(line.as_bytes()).await.unwrap();
            self.input.write_all(b"\n").await.unwrap();
        }

        async fn read(&mut self) -> Envelope {
            let line = self.output.next_line().await.unwrap().unwrap();
            Envelope::decode(&line).unwrap()
        }
    }

    async fn start() -> (Harness, Vec<NodeId>) {
        let (mut input, node_in) = tokio::io::duplex(64 * 1024);
        let (node_out, output) = tokio::io::duplex(64 * 1024);

        input
            .write_all(
                b"\n{\"src\":\"c0\",\"dest\":\"n1\",\"body\":{\"type\":\"init\",\"msg_id\":1,\"node_id\":\"n1\",\"node_ids\":[\"n1\",\"n2\"]}}\n",
            )
            .await
            .unwrap();

        let (transport, members) = LineTransport::handshake(BufReader::new(node_in), node_out)
            .await
            .unwrap();

        let harness = Harness {
            transport: Arc::new(transport),
            input,
            output: BufReader::new(output).lines(),
        };
        (harness, members)
    }

    #[tokio::test]
    async fn test_handshake_answers_init_ok() {
        let (mut harness, members) = start().await;
        assert_eq!(members, vec![NodeId::from("n1"), NodeId::from("n2")]);
        assert_eq!(harness.transport.local_node_id(), NodeId::from("n1"));

        let reply = harness.read().await;
        assert_eq!(reply.src, NodeId::from("n1"));
        assert_eq!(reply.dest, NodeId::from("c0"));
        assert_eq!(reply.body.in_reply_to, Some(1));
        assert_eq!(reply.body.body, Body::InitOk);
    }

    #[tokio::test]
    async fn test_handshake_requires_init_first() {
        let (mut input, node_in) = tokio::io::duplex(4096);
        let (node_out, _output) = tokio::io::duplex(4096);
        input
            .write_all(b"{\"src\":\"c1\",\"dest\":\"n1\",\"body\":{\"type\":\"read\",\"msg_id\":1}}\n")
            .await
            .unwrap();

        let result = LineTransport::handshake(BufReader::new(node_in), node_out).await;
        assert!(matches!(result, Err(NodeError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn test_handshake_fails_on_eof() {
        let (input, node_in) = tokio::io::duplex(4096);
        let (node_out, _output) = tokio::io::duplex(4096);
        drop(input);

        let result = LineTransport::handshake(BufReader::new(node_in), node_out).await;
        assert!(matches!(result, Err(NodeError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn test_request_and_reply() {
        let (mut harness, _) = start().await;
        harness.read().await;

        harness
            .write(r#"{"src":"c1","dest":"n1","body":{"type":"broadcast","msg_id":7,"message":42}}"#)
            .await;
        let request = harness.transport.recv().await.unwrap();
        assert_eq!(request.body.body, Body::Broadcast { value: Value(42) });

        harness
            .transport
            .reply(&request, Body::BroadcastOk)
            .await
            .unwrap();
        let reply = harness.read().await;
        assert_eq!(reply.dest, NodeId::from("c1"));
        assert_eq!(reply.body.in_reply_to, Some(7));
        assert_eq!(reply.body.body, Body::BroadcastOk);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_reply() {
        let (mut harness, _) = start().await;
        harness.read().await;

        harness
            .write(r#"{"src":"c1","dest":"n1","body":{"type":"frobnicate","msg_id":4}}"#)
            .await;
        harness.write("not json at all").await;
        harness
            .write(r#"{"src":"c1","dest":"n1","body":{"type":"read","msg_id":5}}"#)
            .await;

        // The malformed lines are consumed; the valid request comes through.
        let request = harness.transport.recv().await.unwrap();
        assert_eq!(request.body.msg_id, Some(5));

        // Only the addressable one was answered.
        let reply = harness.read().await;
        assert_eq!(reply.dest, NodeId::from("c1"));
        assert_eq!(reply.body.in_reply_to, Some(4));
        match reply.body.body {
            Body::Error { code, .. } => assert_eq!(code, ErrorCode::MalformedRequest),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped() {
        let (mut harness, _) = start().await;
        harness.read().await;

        harness.input.write_all(b"\xff\xfe garbage\n").await.unwrap();
        harness
            .write(r#"{"src":"c1","dest":"n1","body":{"type":"read","msg_id":5}}"#)
            .await;

        let request = harness.transport.recv().await.unwrap();
        assert_eq!(request.body.msg_id, Some(5));
        assert_eq!(request.body.body, Body::Read);
    }

    #[tokio::test]
    async fn test_crlf_line_endings_accepted() {
        let (mut harness, _) = start().await;
        harness.read().await;

        harness
            .write("{\"src\":\"c1\",\"dest\":\"n1\",\"body\":{\"type\":\"read\",\"msg_id\":3}}\r")
            .await;
        let request = harness.transport.recv().await.unwrap();
        assert_eq!(request.body.msg_id, Some(3));
    }

    #[tokio::test]
    async fn test_unwritable_error_reply_does_not_stop_recv() {
        let (harness, _) = start().await;
        let Harness {
            transport,
            mut input,
            output,
        } = harness;
        // Nobody reads the output any more, so every write fails.
        drop(output);

        input
            .write_all(b"{\"src\":\"c1\",\"dest\":\"n1\",\"body\":{\"type\":\"frobnicate\",\"msg_id\":4}}\n")
            .await
            .unwrap();
        input
            .write_all(b"{\"src\":\"c1\",\"dest\":\"n1\",\"body\":{\"type\":\"read\",\"msg_id\":5}}\n")
            .await
            .unwrap();

        let request = transport.recv().await.unwrap();
        assert_eq!(request.body.msg_id, Some(5));
    }

    #[tokio::test]
    async fn test_rpc_reply_routed_by_recv() {
        let (mut harness, _) = start().await;
        harness.read().await;

        let transport = Arc::clone(&harness.transport);
        let rpc = tokio::spawn(async move {
            transport
                .rpc(
                    &NodeId::from("n2"),
                    Body::Gossip {
                        values: vec![Value(1)],
                    },
                    Duration::from_secs(5),
                )
                .await
        });

        let outgoing = harness.read().await;
        assert_eq!(outgoing.dest, NodeId::from("n2"));
        let msg_id = outgoing.body.msg_id.unwrap();

        harness
            .write(&format!(
                r#"{{"src":"n2","dest":"n1","body":{{"type":"gossip_ok","in_reply_to":{},"acknowledged":[1]}}}}"#,
                msg_id
            ))
            .await;
        harness
            .write(r#"{"src":"c1","dest":"n1","body":{"type":"read","msg_id":9}}"#)
            .await;

        let request = harness.transport.recv().await.unwrap();
        assert_eq!(request.body.body, Body::Read);

        let reply = rpc.await.unwrap().unwrap();
        assert_eq!(
            reply,
            Body::GossipOk {
                acknowledged: vec![Value(1)]
            }
        );
        assert_eq!(harness.transport.pending_rpcs(), 0);
    }

    #[tokio::test]
    async fn test_recv_closed_at_eof() {
        let (harness, _) = start().await;
        let Harness {
            transport, input, ..
        } = harness;
        drop(input);

        assert!(matches!(transport.recv().await, Err(SyncError::Closed)));
    }
}
