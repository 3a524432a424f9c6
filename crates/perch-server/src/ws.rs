//! Adapts an axum WebSocket to the translator's text stream and sink.

use axum::extract::ws::{Message, WebSocket};
use futures::future::{ready, Ready};
use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::translator::TransportError;

/// Split a socket into a stream of text frames and a sink of text frames.
///
/// Text frames pass through and binary frames are read as UTF-8. Ping and
/// pong are skipped (axum answers pings itself). A close frame ends the
/// stream.
pub fn split(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<String, TransportError>> + Unpin + Send,
    impl Sink<String, Error = axum::Error> + Unpin + Send,
) {
    let (sink, stream) = socket.split();

    let frames = stream
        .take_while(|msg| ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| ready(to_text(msg)));

    let writer = sink.with(|text: String| -> Ready<Result<Message, axum::Error>> {
        ready(Ok(Message::Text(text.into())))
    });

    (frames, writer)
}

fn to_text(msg: Result<Message, axum::Error>) -> Option<Result<String, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes.to_vec()).map_err(|_| TransportError::InvalidUtf8),
        ),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(TransportError::Read(e.to_string()))),
    }
}
