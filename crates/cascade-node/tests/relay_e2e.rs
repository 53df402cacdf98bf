#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use cascade_core::media::{
    build_stream_header, build_tag, AudioParams, MediaMetadata, MediaTag, StreamHeader, TagKind, VideoParams,
};
use cascade_node::relay;

use common::{eventually, spawn_node};

const NODE: &str = r#"
version: 1
cinfo:
  cid: "sub1"
reconnect:
  interval_ms: 200
relay:
  health_interval_ms: 200
"#;

fn av() -> StreamHeader {
    StreamHeader {
        has_audio: true,
        has_video: true,
    }
}

fn metadata() -> MediaMetadata {
    MediaMetadata {
        creator: "cascade".into(),
        audio: Some(AudioParams {
            codec_id: 10,
            sample_rate: 44_100,
            sample_size: 16,
            stereo: true,
        }),
        video: Some(VideoParams {
            codec_id: 7,
            width: 1280,
            height: 720,
        }),
    }
}

fn video(ts: u32, payload: &'static [u8]) -> MediaTag {
    MediaTag {
        kind: TagKind::Video,
        timestamp: ts,
        payload: Bytes::from_static(payload),
    }
}

async fn drain_until_closed<S>(ws: &mut S)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "acceptor did not close the connection");
}

#[tokio::test]
async fn bad_magic_is_refused_without_publishing() {
    let (ctx, addr) = spawn_node(NODE).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/erwscascade/wspush/on?cid=c1&streamPath=live/a"
    ))
    .await
    .expect("upgrade");

    let mut bogus = build_stream_header(av()).to_vec();
    bogus[..3].copy_from_slice(b"XYZ");
    ws.send(Message::Binary(bogus)).await.expect("send");

    drain_until_closed(&mut ws).await;
    assert!(!ctx.hub().contains("live/a-c1"));
}

#[tokio::test]
async fn first_tag_must_be_script() {
    let (ctx, addr) = spawn_node(NODE).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/erwscascade/wspush/on?cid=c1&streamPath=live/a"
    ))
    .await
    .expect("upgrade");

    ws.send(Message::Binary(build_stream_header(av()).to_vec())).await.expect("header");
    let tag = build_tag(TagKind::Video, 0, b"frame").unwrap();
    ws.send(Message::Binary(tag.to_vec())).await.expect("tag");

    drain_until_closed(&mut ws).await;
    assert!(!ctx.hub().contains("live/a-c1"));
}

#[tokio::test]
async fn push_without_stream_path_is_refused() {
    let (_ctx, addr) = spawn_node(NODE).await;
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/erwscascade/wspush/on?cid=c1"))
        .await
        .expect_err("must be refused");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 400),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn pushed_stream_is_republished_and_ends_with_source() {
    let (ctx, addr) = spawn_node(NODE).await;
    let hub = ctx.hub();

    let mut source = hub.try_publish("live/src", av(), metadata()).expect("publish");
    let target = format!("ws://{addr}/erwscascade/wspush/on");
    let handle = relay::start_push(&ctx, "live/src", &target).expect("push");
    assert!(relay::start_push(&ctx, "live/src", &target).is_err());

    eventually("pulled stream", || hub.is_live("live/src-sub1")).await;
    let mut pulled = hub.subscribe("live/src-sub1").expect("subscribe");
    assert_eq!(pulled.header(), av());
    assert_eq!(pulled.metadata(), &metadata());

    source.write(video(1000, b"k1"));
    source.write(video(1040, b"p1"));
    source.write(MediaTag {
        kind: TagKind::Audio,
        timestamp: 1060,
        payload: Bytes::from_static(b"a1"),
    });

    let mut got = Vec::new();
    for _ in 0..3 {
        let tag = tokio::time::timeout(Duration::from_secs(5), pulled.recv())
            .await
            .expect("frame in time")
            .expect("frame");
        got.push((tag.kind, tag.timestamp, tag.payload));
    }
    assert_eq!(
        got,
        vec![
            (TagKind::Video, 0, Bytes::from_static(b"k1")),
            (TagKind::Video, 40, Bytes::from_static(b"p1")),
            (TagKind::Audio, 60, Bytes::from_static(b"a1")),
        ]
    );

    drop(source);
    eventually("pulled stream end", || !hub.is_live("live/src-sub1")).await;

    assert!(ctx.stop_push("live/src", &target));
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("push supervisor stops")
        .unwrap();
    assert!(ctx.pushes().is_empty());
}

#[tokio::test]
async fn second_push_for_live_key_is_discarded() {
    let (ctx, addr) = spawn_node(NODE).await;
    let hub = ctx.hub();
    let _owner = hub.try_publish("live/b-c2", av(), metadata()).expect("publish");
    let mut watcher = hub.subscribe("live/b-c2").expect("subscribe");

    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/erwscascade/wspush/on?cid=c2&streamPath=live/b"
    ))
    .await
    .expect("upgrade");
    ws.send(Message::Binary(build_stream_header(av()).to_vec())).await.unwrap();
    let script = build_tag(TagKind::Script, 0, &metadata().to_script_payload().unwrap()).unwrap();
    ws.send(Message::Binary(script.to_vec())).await.unwrap();
    let frame = build_tag(TagKind::Video, 5, b"intruder").unwrap();
    ws.send(Message::Binary(frame.to_vec())).await.unwrap();

    let nothing = tokio::time::timeout(Duration::from_millis(300), watcher.recv()).await;
    assert!(nothing.is_err(), "frames from a non-owner must not reach subscribers");
    assert!(hub.is_live("live/b-c2"));
}
