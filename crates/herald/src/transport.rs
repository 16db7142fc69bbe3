//! Physical transport adapters.
//!
//! The connection actor works on whole text frames: an outbound sink of
//! `String` and an inbound stream of `Result<String, TransportError>`.
//! [`websocket`] adapts a `tokio-tungstenite` stream to that shape; tests
//! plug in in-memory channels instead.

use crate::error::TransportError;
use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Outbound half: accepts whole text frames.
pub type OutboundSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half: yields whole text frames until the peer goes away.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Split a WebSocket into text-frame halves.
///
/// Binary frames carrying UTF-8 are accepted as text. Ping/pong is answered
/// by tungstenite itself and never surfaces. A close frame ends the stream
/// with [`TransportError::Closed`].
pub fn websocket<S>(ws: WebSocketStream<S>) -> (OutboundSink, InboundStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws.split();

    let sink = write
        .sink_map_err(TransportError::from)
        .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

    let stream = read.filter_map(|frame| {
        future::ready(match frame {
            Ok(Message::Text(text)) => Some(Ok(text.to_string())),
            Ok(Message::Binary(bytes)) => Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| TransportError::Other("binary frame is not UTF-8".to_string())),
            ),
            Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
            Ok(_) => None,
            Err(e) => Some(Err(e.into())),
        })
    });

    (Box::pin(sink), Box::pin(stream))
}
