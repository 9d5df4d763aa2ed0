//! Live log tailing over server-sent events.
//!
//! Each connected client is one broker subscription: replayed history
//! first, then live lines in writer order, one `line` event per log
//! line. A client that lags past its buffer receives a final
//! `overflow` event and the stream closes.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use super::{handlers::parse_stream, AppState};
use crate::error::MirrorError;
use crate::logs::TailEvent;

#[derive(Deserialize)]
pub struct StreamQuery {
    /// `app` or `mirror`
    #[serde(default = "default_stream")]
    pub stream: String,
    /// Replay existing lines before live delivery (default true)
    #[serde(default = "default_from_start")]
    pub from_start: bool,
}

fn default_stream() -> String {
    "mirror".to_string()
}

fn default_from_start() -> bool {
    true
}

pub async fn stream_log(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, MirrorError> {
    let stream = parse_stream(&query.stream)?;
    let subscription = state
        .registry
        .subscribe_log(id, stream, query.from_start)?;

    let events = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.next_event().await?;
        let sse_event = match event {
            TailEvent::Line(line) => Event::default().event("line").data(line),
            TailEvent::Overflow => Event::default()
                .event("overflow")
                .data("subscriber lagged behind the log buffer; reconnect to resume"),
        };
        Some((Ok(sse_event), subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
