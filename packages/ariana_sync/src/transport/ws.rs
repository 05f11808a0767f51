use futures::future::{self, BoxFuture};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{Connector, Socket};
use crate::error::TransportError;

/// `ws://` / `wss://` connector backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Socket, TransportError>> {
        let url = self.url.clone();
        async move {
            debug!(%url, "opening websocket");
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (ws_write, ws_read) = ws_stream.split();

            let sink = ws_write.sink_map_err(TransportError::from).with(|text: String| {
                future::ready(Ok::<_, TransportError>(Message::Text(text.into())))
            });

            // Binary frames are not part of the protocol; control frames are
            // answered by tungstenite itself.
            let stream = ws_read.filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

            Ok(Socket::new(Box::pin(sink), Box::pin(stream)))
        }
        .boxed()
    }
}
