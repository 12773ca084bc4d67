//! Shared SSE byte-stream reassembly for the translated streaming paths
//!
//! Upstream frames its `streamGenerateContent` response as standard SSE
//! (`data: {...}\n\n`); this collapses that into a stream of payload lines
//! so `ingress::openai`/`ingress::anthropic` only deal with parsed JSON.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

/// Reassemble raw upstream bytes into individual `data:` payload lines,
/// buffering across chunk boundaries since SSE frames don't align with
/// TCP segment boundaries.
pub fn lines(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = String> + Send + 'static {
    futures_util::stream::unfold(
        (Box::pin(byte_stream), String::new(), Vec::<String>::new()),
        |(mut stream, mut buf, mut pending)| async move {
            loop {
                if let Some(line) = pending.pop() {
                    return Some((line, (stream, buf, pending)));
                }
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buf.push_str(&String::from_utf8_lossy(&chunk));
                        let mut found: Vec<String> = Vec::new();
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            buf = buf[pos + 1..].to_string();
                            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                                let data = data.trim();
                                if !data.is_empty() {
                                    found.push(data.to_string());
                                }
                            }
                        }
                        found.reverse();
                        pending = found;
                    }
                    Some(Err(_)) | None => return None,
                }
            }
        },
    )
}
