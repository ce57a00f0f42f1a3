//! WebSocket JSON live feed.
//!
//! The feed endpoint pushes one JSON object per text frame, tagged by `type`:
//! `gift`, `like`, `connected`, `disconnected`, `streamEnd` or `error`. Gift
//! and like frames carry the vendor payload fields inline.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use config::Settings;
use futures_util::{SinkExt, StreamExt};
use giftkey_engine::{
    Error as EngineError, EventProducer, ProducerEvent, ProducerFactory, ProducerSink, RawGift,
    RawLike, Result as EngineResult,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{select, time};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// How long the initial handshake may take.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One frame from the feed.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum FeedFrame {
    /// Gift payload.
    Gift(RawGift),
    /// Like payload.
    Like(RawLike),
    /// Upstream (re)connected.
    Connected,
    /// Upstream dropped.
    Disconnected,
    /// Broadcast ended.
    StreamEnd,
    /// Upstream failure.
    Error {
        /// Human-readable reason.
        #[serde(default)]
        message: String,
    },
}

/// Parse a feed text frame into a producer event.
pub fn parse_frame(text: &str) -> Result<ProducerEvent> {
    let frame: FeedFrame = serde_json::from_str(text).map_err(|e| Error::Feed(e.to_string()))?;
    Ok(match frame {
        FeedFrame::Gift(raw) => ProducerEvent::Gift(raw),
        FeedFrame::Like(raw) => ProducerEvent::Like(raw),
        FeedFrame::Connected => ProducerEvent::Connected,
        FeedFrame::Disconnected => ProducerEvent::Disconnected,
        FeedFrame::StreamEnd => ProducerEvent::StreamEnd,
        FeedFrame::Error { message } => ProducerEvent::Error(message),
    })
}

/// Builds [`FeedProducer`]s against the configured endpoint template.
pub struct FeedProducers {
    /// Source of the endpoint template.
    settings: Settings,
}

impl FeedProducers {
    /// Create a factory using `settings.feed_url`.
    pub fn new(settings: Settings) -> Arc<Self> {
        Arc::new(Self { settings })
    }
}

impl ProducerFactory for FeedProducers {
    fn create(&self, username: &str, sink: ProducerSink) -> Arc<dyn EventProducer> {
        Arc::new(FeedProducer {
            url: self.settings.feed_url_for(username),
            sink,
            cancel: Mutex::new(None),
        })
    }
}

/// A subscription to one account's feed.
pub struct FeedProducer {
    /// Resolved endpoint.
    url: String,
    /// Engine-side event sink.
    sink: ProducerSink,
    /// Stops the reader task.
    cancel: Mutex<Option<CancellationToken>>,
}

#[async_trait]
impl EventProducer for FeedProducer {
    async fn connect(&self) -> EngineResult<()> {
        let handshake = time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())).await;
        let (ws, _response) = match handshake {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(EngineError::Producer(format!(
                    "Failed to connect to {}: {}",
                    self.url, e
                )));
            }
            Err(_) => {
                return Err(EngineError::Producer(format!(
                    "Timed out connecting to {}",
                    self.url
                )));
            }
        };
        info!(url = %self.url, generation = self.sink.generation(), "feed_connected");

        let token = CancellationToken::new();
        if let Some(old) = self.cancel.lock().replace(token.clone()) {
            old.cancel();
        }
        let sink = self.sink.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let (mut write, mut read) = ws.split();
            loop {
                let next = select! {
                    next = read.next() => next,
                    () = token.cancelled() => {
                        let _ignored = write.close().await;
                        return;
                    }
                };
                match next {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Ok(event) => {
                            if !sink.emit(event) {
                                debug!("feed_engine_gone");
                                return;
                            }
                        }
                        Err(e) => warn!(url = %url, error = %e, "feed_frame_ignored"),
                    },
                    Some(Ok(Message::Ping(p))) => {
                        if write.send(Message::Pong(p)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(url = %url, error = %e, "feed_read_error");
                        break;
                    }
                }
            }
            if !token.is_cancelled() {
                info!(url = %url, "feed_closed");
                sink.emit(ProducerEvent::Disconnected);
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gift_frames_carry_vendor_fields() {
        let text =
            r#"{"type":"gift","giftName":"Rose","giftType":1,"repeatCount":3,"uniqueId":"amy"}"#;
        let ProducerEvent::Gift(raw) = parse_frame(text).unwrap() else {
            panic!("expected gift");
        };
        assert_eq!(raw.gift_name, "Rose");
        assert_eq!(raw.repeat_count, Some(3));
        assert_eq!(raw.sender(), "amy");
    }

    #[test]
    fn lifecycle_frames() {
        assert!(matches!(
            parse_frame(r#"{"type":"streamEnd"}"#).unwrap(),
            ProducerEvent::StreamEnd
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"like","likeCount":15}"#).unwrap(),
            ProducerEvent::Like(RawLike {
                like_count: Some(15),
                ..
            })
        ));
        let ProducerEvent::Error(message) =
            parse_frame(r#"{"type":"error","message":"room offline"}"#).unwrap()
        else {
            panic!("expected error");
        };
        assert_eq!(message, "room offline");
    }

    #[test]
    fn junk_is_a_feed_error() {
        assert!(matches!(parse_frame("{}"), Err(Error::Feed(_))));
        assert!(matches!(
            parse_frame(r#"{"type":"follow"}"#),
            Err(Error::Feed(_))
        ));
    }
}
