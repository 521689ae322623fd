use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::{Stream, stream};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, warn};

use crate::{AppState, pipeline::ProgressEvent};

pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(stream_events))
}

/// Server-sent progress events for the running (and every later) analysis.
async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    debug!("progress subscriber connected");
    Sse::new(event_stream(receiver)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn event_stream(
    receiver: Receiver<ProgressEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse_event) => return Some((Ok(sse_event), receiver)),
                    Err(err) => warn!(error = %err, "failed to encode progress event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress subscriber lagged; events dropped");
                    let notice = Event::default()
                        .event("lagged")
                        .data(skipped.to_string());
                    return Some((Ok(notice), receiver));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
