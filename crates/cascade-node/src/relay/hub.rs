//! In-process stream hub: the boundary where relayed frames are handed to
//! (and taken from) local media distribution.
//!
//! Each stream key owns a `broadcast` channel. At most one `Publisher` holds a
//! key at a time; any number of `Subscriber`s fan out from it. Frame payloads
//! are `Bytes`, so subscribers share one allocation per frame.
//!
//! A stream entry outlives its publisher and remembers the last absolute
//! timestamp written, so the next publisher continues the same timeline.
//! Entries with no publisher and no subscribers are dropped once they have
//! been idle for the hub's grace period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use cascade_core::media::{MediaMetadata, MediaTag, StreamHeader, TimestampRebaser};

const CHANNEL_CAPACITY: usize = 1024;
const IDLE_GRACE: Duration = Duration::from_secs(60);

/// Events delivered to subscribers.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Frame(MediaTag),
    /// The publisher went away.
    End,
}

struct StreamSlot {
    tx: broadcast::Sender<StreamEvent>,
    /// Publisher currently holding the key (0 = none).
    publisher: u64,
    header: StreamHeader,
    metadata: MediaMetadata,
    last_ts: u32,
    /// Set when the last publisher left.
    idle_since: Option<Instant>,
}

impl StreamSlot {
    fn is_expired(&self, grace: Duration) -> bool {
        self.publisher == 0
            && self.tx.receiver_count() == 0
            && self.idle_since.map(|t| t.elapsed() >= grace).unwrap_or(false)
    }
}

/// Row of the stream listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub path: String,
    pub live: bool,
    #[serde(rename = "hasAudio")]
    pub has_audio: bool,
    #[serde(rename = "hasVideo")]
    pub has_video: bool,
    pub subscribers: usize,
    #[serde(rename = "lastTimestamp")]
    pub last_timestamp: u32,
}

pub struct StreamHub {
    streams: DashMap<String, StreamSlot>,
    next_id: AtomicU64,
    idle_grace: Duration,
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHub {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            next_id: AtomicU64::new(0),
            idle_grace: IDLE_GRACE,
        }
    }

    pub fn with_idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    /// Drop entries idle past the grace period. Returns how many went.
    pub fn sweep_idle(&self) -> usize {
        let before = self.streams.len();
        let grace = self.idle_grace;
        self.streams.retain(|key, slot| {
            let expired = slot.is_expired(grace);
            if expired {
                tracing::debug!(stream = %key, last_ts = slot.last_ts, "idle stream dropped");
            }
            !expired
        });
        before.saturating_sub(self.streams.len())
    }

    /// Take publishing ownership of `key`. `None` while another publisher is live.
    pub fn try_publish(
        self: &Arc<Self>,
        key: &str,
        header: StreamHeader,
        metadata: MediaMetadata,
    ) -> Option<Publisher> {
        self.sweep_idle();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let (tx, base) = match self.streams.entry(key.to_string()) {
            Entry::Occupied(mut o) => {
                let slot = o.get_mut();
                if slot.publisher != 0 {
                    return None;
                }
                slot.publisher = id;
                slot.idle_since = None;
                slot.header = header;
                slot.metadata = metadata;
                (slot.tx.clone(), slot.last_ts)
            }
            Entry::Vacant(v) => {
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                v.insert(StreamSlot {
                    tx: tx.clone(),
                    publisher: id,
                    header,
                    metadata,
                    last_ts: 0,
                    idle_since: None,
                });
                (tx, 0)
            }
        };

        tracing::info!(stream = %key, publisher = id, base, "stream published");
        Some(Publisher {
            hub: Arc::clone(self),
            key: key.to_string(),
            id,
            tx,
            rebaser: TimestampRebaser::with_base(base),
        })
    }

    /// Attach to a live stream.
    pub fn subscribe(self: &Arc<Self>, key: &str) -> Option<Subscriber> {
        let slot = self.streams.get(key)?;
        if slot.publisher == 0 {
            return None;
        }
        Some(Subscriber {
            hub: Arc::clone(self),
            key: key.to_string(),
            publisher: slot.publisher,
            header: slot.header,
            metadata: slot.metadata.clone(),
            rx: slot.tx.subscribe(),
            ended: false,
        })
    }

    pub fn is_live(&self, key: &str) -> bool {
        self.streams
            .get(key)
            .map(|s| s.publisher != 0)
            .unwrap_or(false)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.streams.contains_key(key)
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.sweep_idle();
        let mut out: Vec<StreamInfo> = self
            .streams
            .iter()
            .map(|r| StreamInfo {
                path: r.key().clone(),
                live: r.publisher != 0,
                has_audio: r.header.has_audio,
                has_video: r.header.has_video,
                subscribers: r.tx.receiver_count(),
                last_timestamp: r.last_ts,
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    fn current_publisher(&self, key: &str) -> u64 {
        self.streams.get(key).map(|s| s.publisher).unwrap_or(0)
    }

    fn record_ts(&self, key: &str, id: u64, ts: u32) {
        if let Some(mut slot) = self.streams.get_mut(key) {
            if slot.publisher == id {
                slot.last_ts = ts;
            }
        }
    }

    fn unpublish(&self, key: &str, id: u64) {
        if let Some(mut slot) = self.streams.get_mut(key) {
            if slot.publisher == id {
                slot.publisher = 0;
                slot.idle_since = Some(Instant::now());
                let _ = slot.tx.send(StreamEvent::End);
                tracing::info!(stream = %key, publisher = id, last_ts = slot.last_ts, "stream unpublished");
            }
        }
    }
}

/// Publishing ownership of one stream key. Dropping it ends the stream.
pub struct Publisher {
    hub: Arc<StreamHub>,
    key: String,
    id: u64,
    tx: broadcast::Sender<StreamEvent>,
    rebaser: TimestampRebaser,
}

impl Publisher {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Rebase `tag` onto the stream timeline and fan it out.
    /// Returns the absolute timestamp written.
    pub fn write(&mut self, mut tag: MediaTag) -> u32 {
        let ts = self.rebaser.rebase(tag.timestamp);
        tag.timestamp = ts;
        self.hub.record_ts(&self.key, self.id, ts);
        // No subscribers is fine.
        let _ = self.tx.send(StreamEvent::Frame(tag));
        ts
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.hub.unpublish(&self.key, self.id);
    }
}

pub struct Subscriber {
    hub: Arc<StreamHub>,
    key: String,
    publisher: u64,
    header: StreamHeader,
    metadata: MediaMetadata,
    rx: broadcast::Receiver<StreamEvent>,
    ended: bool,
}

impl Subscriber {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn header(&self) -> StreamHeader {
        self.header
    }

    pub fn metadata(&self) -> &MediaMetadata {
        &self.metadata
    }

    /// Next frame, or `None` once the publisher ended.
    /// Lagging drops the missed frames and keeps going.
    pub async fn recv(&mut self) -> Option<MediaTag> {
        if self.ended {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(StreamEvent::Frame(tag)) => return Some(tag),
                Ok(StreamEvent::End) | Err(broadcast::error::RecvError::Closed) => {
                    self.ended = true;
                    return None;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(stream = %self.key, skipped = n, "subscriber lagged");
                }
            }
        }
    }

    /// True once the publisher this subscriber attached to is gone, even if
    /// another publisher has since taken the key.
    pub fn source_closed(&self) -> bool {
        self.ended || self.hub.current_publisher(&self.key) != self.publisher
    }

    pub fn is_playing(&self) -> bool {
        !self.ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cascade_core::media::TagKind;

    fn header() -> StreamHeader {
        StreamHeader {
            has_audio: true,
            has_video: true,
        }
    }

    fn tag(ts: u32) -> MediaTag {
        MediaTag {
            kind: TagKind::Video,
            timestamp: ts,
            payload: Bytes::from_static(b"v"),
        }
    }

    #[tokio::test]
    async fn second_publisher_is_refused_while_live() {
        let hub = Arc::new(StreamHub::new());
        let first = hub.try_publish("live/a-c1", header(), MediaMetadata::default());
        assert!(first.is_some());
        assert!(hub
            .try_publish("live/a-c1", header(), MediaMetadata::default())
            .is_none());

        drop(first);
        assert!(!hub.is_live("live/a-c1"));
        assert!(hub
            .try_publish("live/a-c1", header(), MediaMetadata::default())
            .is_some());
    }

    #[tokio::test]
    async fn subscribers_see_rebased_frames_and_end() {
        let hub = Arc::new(StreamHub::new());
        let mut publisher = hub
            .try_publish("s", header(), MediaMetadata::default())
            .expect("publish");
        let mut sub = hub.subscribe("s").expect("subscribe");

        assert_eq!(publisher.write(tag(1000)), 0);
        assert_eq!(publisher.write(tag(1040)), 40);
        assert_eq!(sub.recv().await.map(|t| t.timestamp), Some(0));
        assert_eq!(sub.recv().await.map(|t| t.timestamp), Some(40));

        drop(publisher);
        assert!(sub.recv().await.is_none());
        assert!(sub.source_closed());
        assert!(!sub.is_playing());
    }

    #[tokio::test]
    async fn republish_continues_timeline() {
        let hub = Arc::new(StreamHub::new());
        let mut p = hub
            .try_publish("s", header(), MediaMetadata::default())
            .expect("publish");
        p.write(tag(500));
        p.write(tag(2500));
        drop(p);

        let mut p = hub
            .try_publish("s", header(), MediaMetadata::default())
            .expect("republish");
        assert_eq!(p.write(tag(10)), 2000);
        assert_eq!(p.write(tag(50)), 2040);
        assert_eq!(hub.streams()[0].last_timestamp, 2040);
    }

    #[test]
    fn subscribe_requires_live_publisher() {
        let hub = Arc::new(StreamHub::new());
        assert!(hub.subscribe("none").is_none());
        let p = hub.try_publish("s", header(), MediaMetadata::default());
        drop(p);
        assert!(hub.subscribe("s").is_none());
        assert!(hub.contains("s"));
    }

    #[tokio::test]
    async fn idle_entries_are_swept_after_grace() {
        let hub = Arc::new(StreamHub::new().with_idle_grace(Duration::ZERO));
        let live = hub.try_publish("live", header(), MediaMetadata::default());
        let gone = hub.try_publish("gone", header(), MediaMetadata::default());
        let watched = hub
            .try_publish("watched", header(), MediaMetadata::default())
            .expect("publish");
        let sub = hub.subscribe("watched").expect("subscribe");

        drop(gone);
        drop(watched);
        let paths: Vec<String> = hub.streams().into_iter().map(|s| s.path).collect();
        assert_eq!(paths, vec!["live".to_string(), "watched".to_string()]);

        // The last subscriber leaving makes the entry collectable.
        drop(sub);
        assert_eq!(hub.sweep_idle(), 1);
        assert!(!hub.contains("watched"));
        assert!(hub.is_live("live"));
        drop(live);
    }

    #[test]
    fn idle_entry_kept_within_grace() {
        let hub = Arc::new(StreamHub::new());
        drop(hub.try_publish("s", header(), MediaMetadata::default()));
        assert_eq!(hub.sweep_idle(), 0);
        assert_eq!(hub.streams().len(), 1);
        assert!(!hub.streams()[0].live);
    }
}
