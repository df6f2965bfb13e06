use std::any::type_name;

use futures::{stream::SplitStream, StreamExt};
use serde::Deserialize;
use tokio::{net::TcpStream, sync::oneshot};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::{
    internal::{EventOP, EventType, OPType, WebsocketMessage},
    websocket::{
        ChapterStartedEvent, ChaptersLoadedEvent, PlayerUpdate, ReadyOP, SegmentSkippedEvent,
        SegmentsLoadedEvent, TrackEndEvent, TrackExceptionEvent, TrackStartEvent, TrackStuckEvent,
        WebSocketClosedEvent,
    },
    Error, ErrorResponse, NodeClient, Result, Stats,
};

/// Parses messages coming from the websocket, dispatching them to the handler as they arrive.
pub(crate) async fn websocket_message_parser(
    node: NodeClient,
    mut sender: Option<oneshot::Sender<()>>,
    mut stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
) {
    while let Some(value) = stream.next().await {
        let message = match value {
            Ok(v) => {
                debug!("parsing the websocket message: {}", v);
                v
            }
            Err(e) => {
                error!("websocket generated an error: {}", e);
                break;
            }
        };

        if let Message::Text(message_str) = message {
            let op = match serde_json::from_str::<WebsocketMessage>(&message_str) {
                Ok(v) => v,
                Err(e) => {
                    warn!("can't parse the message: {}", e);
                    continue;
                }
            };

            match op.op {
                OPType::Ready => {
                    info!("op: ready");
                    let ready = match serde_json::from_str::<ReadyOP>(&message_str) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("can't parse the ready message: {}", e);
                            continue;
                        }
                    };

                    node.set_session(ready.session_id);
                    node.set_connected(true);
                    node.reset_reconnect_attempts();
                    debug!("updated the node's session id and status.");

                    if let Some(some_sender) = sender {
                        if some_sender.send(()).is_err() {
                            error!("can't send the session confirmation...");
                            break;
                        }
                        info!("session confirmation has been sent.");

                        sender = None;
                    }

                    debug!("emitting 'ready' in the event handler...");
                    node.handler().ready(node.clone(), ready.resumed).await;
                }
                OPType::PlayerUpdate => {
                    info!("op: player update");
                    let player_update = match serde_json::from_str::<PlayerUpdate>(&message_str) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("can't parse the playerUpdate message: {}", e);
                            continue;
                        }
                    };

                    node.record_ping(player_update.state.ping);

                    debug!("emitting 'player_update' in the event handler...");
                    node.handler()
                        .player_update(node.clone(), player_update)
                        .await;
                }
                OPType::Stats => {
                    info!("op: stats");
                    let stats = match serde_json::from_str::<Stats>(&message_str) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("can't parse the stats message: {}", e);
                            continue;
                        }
                    };

                    node.record_stats(stats.clone());

                    debug!("emitting 'stats' in the event handler...");
                    node.handler().stats(node.clone(), stats).await;
                }
                OPType::Event => {
                    info!("op: event");
                    let event = match serde_json::from_str::<EventOP>(&message_str) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("can't parse the event message: {}", e);
                            continue;
                        }
                    };

                    match event.event_type {
                        EventType::TrackStartEvent => {
                            info!("event: track start");
                            let track_start =
                                match serde_json::from_str::<TrackStartEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the track start event: {}", e);
                                        continue;
                                    }
                                };

                            debug!("emitting 'track_start_event' in the event handler...");
                            node.handler()
                                .track_start_event(node.clone(), track_start)
                                .await;
                        }
                        EventType::TrackEndEvent => {
                            info!("event: track end");
                            let track_end =
                                match serde_json::from_str::<TrackEndEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the track end event: {}", e);
                                        continue;
                                    }
                                };

                            debug!("emitting 'track_end_event' in the event handler...");
                            node.handler()
                                .track_end_event(node.clone(), track_end)
                                .await;
                        }
                        EventType::TrackExceptionEvent => {
                            info!("event: track exception");
                            let track_exception =
                                match serde_json::from_str::<TrackExceptionEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the track exception event: {}", e);
                                        continue;
                                    }
                                };

                            debug!("emitting 'track_exception_event' in the event handler...");
                            node.handler()
                                .track_exception_event(node.clone(), track_exception)
                                .await;
                        }
                        EventType::TrackStuckEvent => {
                            info!("event: track stuck");
                            let track_stuck =
                                match serde_json::from_str::<TrackStuckEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the track stuck event: {}", e);
                                        continue;
                                    }
                                };

                            debug!("emitting 'track_stuck_event' in the event handler...");
                            node.handler()
                                .track_stuck_event(node.clone(), track_stuck)
                                .await;
                        }
                        EventType::WebSocketClosedEvent => {
                            info!("event: websocket closed");
                            let websocket_closed =
                                match serde_json::from_str::<WebSocketClosedEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the websocket closed event: {}", e);
                                        continue;
                                    }
                                };

                            debug!("emitting 'websocket_closed_event' in the event handler...");
                            node.handler()
                                .websocket_closed_event(node.clone(), websocket_closed)
                                .await;
                        }
                        EventType::SegmentsLoaded => {
                            info!("event: segments loaded");
                            let segments_loaded =
                                match serde_json::from_str::<SegmentsLoadedEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the segments loaded event: {}", e);
                                        continue;
                                    }
                                };

                            node.handler()
                                .segments_loaded_event(node.clone(), segments_loaded)
                                .await;
                        }
                        EventType::SegmentSkipped => {
                            info!("event: segment skipped");
                            let segment_skipped =
                                match serde_json::from_str::<SegmentSkippedEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the segment skipped event: {}", e);
                                        continue;
                                    }
                                };

                            node.handler()
                                .segment_skipped_event(node.clone(), segment_skipped)
                                .await;
                        }
                        EventType::ChaptersLoaded => {
                            info!("event: chapters loaded");
                            let chapters_loaded =
                                match serde_json::from_str::<ChaptersLoadedEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the chapters loaded event: {}", e);
                                        continue;
                                    }
                                };

                            node.handler()
                                .chapters_loaded_event(node.clone(), chapters_loaded)
                                .await;
                        }
                        EventType::ChapterStarted => {
                            info!("event: chapter started");
                            let chapter_started =
                                match serde_json::from_str::<ChapterStartedEvent>(&message_str) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("can't parse the chapter started event: {}", e);
                                        continue;
                                    }
                                };

                            node.handler()
                                .chapter_started_event(node.clone(), chapter_started)
                                .await;
                        }
                    }
                }
            }
        } else if let Message::Close(_) = message {
            debug!("audio node closed the websocket.");
            break;
        } else {
            warn!("the message isn't text and will not be parsed.");
        }
    }

    info!("websocket message parser finished.");
    node.set_connected(false);
    node.mark_disconnected();

    debug!("emitting 'disconnect' in the event handler...");
    node.handler().disconnect(node.clone()).await;

    node.schedule_reconnect();
}

/// Attempts to parse the byte array into the selected type. If this attempt fails, a new
/// attempt will be made parsing the input into an `ErrorResponse`, returned as an
/// `Error::RestError`; if that also fails, `Error::InvalidResponse` is returned.
pub(crate) fn parse_response<'a, T: Deserialize<'a>>(response: &'a [u8]) -> Result<T> {
    serde_json::from_slice::<T>(response).map_err(|e1| {
        warn!("can't parse to '{}': {}", type_name::<T>(), e1);

        match serde_json::from_slice::<ErrorResponse>(response) {
            Ok(v) => Error::RestError(v, Some(e1)),
            Err(e2) => {
                error!("can't parse to ErrorResponse: {}", e2);

                Error::InvalidResponse(Some(e1), e2)
            }
        }
    })
}
