//! Image port scenarios: demultiplexing, resync, stacked decoding, grabs

use std::sync::{Arc, Mutex};

use seestar::device::test_utils::{
    ack_frame_bytes, preview_frame_bytes, stacked_frame_bytes,
};
use seestar::{Camera, Frame, FramePayload, OneShot, SessionState, StreamMode, Telescope};
use tokio::sync::mpsc;

use super::mock_device::MockSeestar;
use crate::WAIT;

const TEST_CONNECTION_REPLY: &[u8] =
    b"{\"jsonrpc\":\"2.0\",\"Timestamp\":\"9507.2\",\"method\":\"test_connection\",\"result\":\"ok\",\"code\":0,\"id\":2}\r\n";

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no frame delivered")
        .expect("frame channel closed")
}

/// Pixels that survive only a bit-exact round trip
fn gradient(len: usize) -> Vec<u16> {
    (0..len).map(|i| (i as u16).wrapping_mul(2654) ^ 0xA5A5).collect()
}

#[tokio::test]
async fn test_stream_demultiplexes_replies_and_frames() {
    let device = MockSeestar::start().await;
    let telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut session = telescope.open_stream(Camera::Telephoto).await.unwrap();
    let mut link = device.accept_telephoto().await;
    let mut frames = session.subscribe_channel(8);

    session.start(StreamMode::Continuous).await.unwrap();
    let request = link.recv_method("begin_streaming").await;
    assert_eq!(request["id"], 2);

    let preview = gradient(4 * 3);
    let stacked = gradient(3 * 2 * 3);
    let mut wire = ack_frame_bytes();
    wire.extend_from_slice(TEST_CONNECTION_REPLY);
    wire.extend(preview_frame_bytes(4, 3, &preview));
    wire.extend_from_slice(TEST_CONNECTION_REPLY);
    wire.extend(stacked_frame_bytes(3, 2, &stacked));
    link.send_bytes(&wire).await;

    let first = recv_frame(&mut frames).await;
    match &first.payload {
        FramePayload::Preview(raster) => {
            assert_eq!((raster.width, raster.height, raster.channels), (4, 3, 1));
            assert_eq!(raster.samples(), preview);
        }
        other => panic!("expected preview, got {other:?}"),
    }

    let second = recv_frame(&mut frames).await;
    match &second.payload {
        FramePayload::Stacked(raster) => {
            assert_eq!(raster.channels, 3);
            assert_eq!(raster.samples(), stacked);
            // column 2, row 1, third channel
            assert_eq!(raster.sample(2, 1, 2), Some(stacked[17]));
        }
        other => panic!("expected stacked, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Streaming);

    session.close().await;
}

#[tokio::test]
async fn test_corrupted_header_resyncs_to_next_frame() {
    let device = MockSeestar::start().await;
    let telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut session = telescope.open_stream(Camera::Telephoto).await.unwrap();
    let mut link = device.accept_telephoto().await;
    let mut frames = session.subscribe_channel(8);

    let mut corrupted = preview_frame_bytes(2, 2, &[1, 2, 3, 4]);
    corrupted[0] ^= 0xFF;
    corrupted[1] ^= 0xFF;

    let stacked = gradient(2 * 2 * 3);
    let mut wire = corrupted;
    wire.extend_from_slice(b"\x00\x00stray");
    wire.extend(stacked_frame_bytes(2, 2, &stacked));
    wire.extend(preview_frame_bytes(1, 1, &[99]));
    link.send_bytes(&wire).await;

    let frame = recv_frame(&mut frames).await;
    assert_eq!(frame.raster().unwrap().samples(), stacked);
    let frame = recv_frame(&mut frames).await;
    assert_eq!(frame.raster().unwrap().samples(), vec![99]);

    session.close().await;
}

#[tokio::test]
async fn test_every_subscriber_sees_frames_in_order() {
    let device = MockSeestar::start().await;
    let telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut session = telescope.open_stream(Camera::Wide).await.unwrap();
    let mut link = device.accept_wide().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.subscribe(move |frame: Frame| {
        sink.lock().unwrap().push(frame.raster().unwrap().samples()[0]);
    });
    let mut frames = session.subscribe_channel(8);

    for value in [10u16, 20, 30] {
        link.send_bytes(&preview_frame_bytes(1, 1, &[value])).await;
    }

    let mut via_channel = Vec::new();
    for _ in 0..3 {
        via_channel.push(recv_frame(&mut frames).await.raster().unwrap().samples()[0]);
    }
    assert_eq!(via_channel, vec![10, 20, 30]);
    assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30]);

    session.close().await;
}

#[tokio::test]
async fn test_device_hangup_ends_session() {
    let device = MockSeestar::start().await;
    let telescope = Telescope::connect(device.settings()).await.unwrap();
    let session = telescope.open_stream(Camera::Telephoto).await.unwrap();
    let link = device.accept_telephoto().await;
    let mut frames = session.subscribe_channel(2);

    drop(link);

    let mut states = session.state_receiver();
    let state = tokio::time::timeout(WAIT, states.wait_for(SessionState::is_finished))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(matches!(state, SessionState::Dead { .. }), "{state:?}");
    assert!(tokio::time::timeout(WAIT, frames.recv()).await.unwrap().is_none());
    assert!(session.start(StreamMode::Continuous).await.is_err());
}

#[tokio::test]
async fn test_close_stops_streaming() {
    let device = MockSeestar::start().await;
    let telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut session = telescope.open_stream(Camera::Telephoto).await.unwrap();
    let mut link = device.accept_telephoto().await;

    session.start(StreamMode::Continuous).await.unwrap();
    link.recv_method("begin_streaming").await;

    session.close().await;
    link.recv_method("stop_streaming").await;
    link.expect_closed().await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_grab_stacked_from_wide_camera() {
    let device = MockSeestar::start().await;
    let telescope = Telescope::connect(device.settings()).await.unwrap();
    let pixels = gradient(5 * 4 * 3);

    let device_side = async {
        let mut link = device.accept_wide().await;
        link.recv_method("get_stacked_img").await;
        let mut wire = ack_frame_bytes();
        wire.extend(stacked_frame_bytes(5, 4, &pixels));
        link.send_bytes(&wire).await;
        link.expect_closed().await;
    };

    let (frame, ()) = tokio::join!(
        telescope.grab(Camera::Wide, OneShot::Stacked),
        device_side
    );
    let frame = frame.unwrap();
    assert!(!frame.is_ack());
    let raster = frame.into_raster().unwrap();
    assert_eq!((raster.width, raster.height), (5, 4));
    assert_eq!(raster.samples(), pixels);
}

#[tokio::test]
async fn test_grab_preview_from_telephoto() {
    let device = MockSeestar::start().await;
    let telescope = Telescope::connect(device.settings()).await.unwrap();

    let device_side = async {
        let mut link = device.accept_telephoto().await;
        link.recv_method("get_current_img").await;
        link.send_bytes(&preview_frame_bytes(2, 1, &[512, 1024])).await;
        link.expect_closed().await;
    };

    let (frame, ()) = tokio::join!(
        telescope.grab(Camera::Telephoto, OneShot::Preview),
        device_side
    );
    assert_eq!(frame.unwrap().raster().unwrap().samples(), vec![512, 1024]);
}
