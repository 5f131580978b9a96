use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{ReceiverStream, WatchStream};
use tracing::{info, warn};

use crate::dto::{
    sse::{MATCH_VIEW_EVENT, ServerEvent},
    view::MatchViewState,
};

/// Convert a view watcher into an SSE response emitting one `match.view`
/// event per change. The stream ends once the controller stops.
pub fn to_sse_stream(
    views: watch::Receiver<MatchViewState>,
    match_id: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads view updates and pushes them into mpsc
    tokio::spawn(async move {
        let mut views = WatchStream::new(views);
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = views.next() => {
                    let Some(view) = next else {
                        break;
                    };
                    let payload = match ServerEvent::json(Some(MATCH_VIEW_EVENT.to_string()), &view) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(match_id = %match_id, error = %err, "failed to serialise match view");
                            continue;
                        }
                    };

                    let mut event = Event::default().data(payload.data);
                    if let Some(name) = payload.event {
                        event = event.event(name);
                    }
                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!(match_id = %match_id, "match view SSE stream closed");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
