//! Flow control toward each endpoint: eager acknowledgement of received DATA
//! and per-stream ordered emission under the windows the endpoints grant.

use bytes::Bytes;
use h2_intercept::{settings_id, Config, H2Frame};

use super::harness::{request_headers, Peer, Proxied};

async fn set_initial_window(p: &mut Proxied, size: u32) {
    let settings = H2Frame::Settings {
        ack: false,
        settings: vec![(settings_id::INITIAL_WINDOW_SIZE, size)],
    };
    p.server.send(settings.clone()).await;
    // Applied before it is forwarded.
    assert_eq!(p.client.recv().await, settings);
}

async fn recv_data(peer: &mut Peer) -> (u32, Bytes, bool) {
    match peer.recv_skipping_window_updates().await {
        H2Frame::Data {
            stream_id,
            end_stream,
            data,
        } => (stream_id, data, end_stream),
        other => panic!("expected DATA, got {other}"),
    }
}

#[tokio::test]
async fn test_received_data_is_acknowledged_immediately() {
    let mut p = Proxied::start(Config::new()).await;

    p.client.send_headers(1, &request_headers("/upload"), false).await;
    p.client.send_data(1, b"12345", false).await;

    assert_eq!(
        p.client.recv().await,
        H2Frame::WindowUpdate {
            stream_id: 0,
            increment: 5,
        }
    );
    assert_eq!(
        p.client.recv().await,
        H2Frame::WindowUpdate {
            stream_id: 1,
            increment: 5,
        }
    );

    // Empty DATA costs nothing and earns no credit.
    p.client.send_data(1, b"", true).await;
    p.server.recv_headers().await;
    assert_eq!(recv_data(&mut p.server).await, (1, Bytes::from_static(b"12345"), false));
    assert_eq!(recv_data(&mut p.server).await, (1, Bytes::new(), true));
    p.client.expect_quiet().await;

    p.hang_up().await.unwrap();
}

#[tokio::test]
async fn test_zero_window_holds_data_until_window_update() {
    let mut p = Proxied::start(Config::new()).await;
    set_initial_window(&mut p, 0).await;

    p.client.send_headers(1, &request_headers("/slow"), false).await;
    p.client.send_data(1, b"hello", false).await;
    let trailers = vec![h2_intercept::H2Header::new("x-checksum", "abc")];
    p.client.send_headers(1, &trailers, true).await;

    let (id, _, _) = p.server.recv_headers().await;
    assert_eq!(id, 1);
    p.server.expect_quiet().await;

    // Other streams are not held up by stream 1.
    p.client.send_headers(3, &request_headers("/fast"), true).await;
    let (id, headers, end_stream) = p.server.recv_headers().await;
    assert_eq!((id, end_stream), (3, true));
    assert_eq!(headers, request_headers("/fast"));

    p.server
        .send(H2Frame::WindowUpdate {
            stream_id: 1,
            increment: 5,
        })
        .await;
    assert_eq!(recv_data(&mut p.server).await, (1, Bytes::from_static(b"hello"), false));
    let (id, headers, end_stream) = p.server.recv_headers().await;
    assert_eq!((id, end_stream), (1, true));
    assert_eq!(headers, trailers);

    p.hang_up().await.unwrap();
}

#[tokio::test]
async fn test_data_frame_waits_for_a_window_it_fits_in() {
    let mut p = Proxied::start(Config::new()).await;
    set_initial_window(&mut p, 0).await;

    p.client.send_headers(1, &request_headers("/"), false).await;
    p.client.send_data(1, b"0123456789", true).await;
    p.server.recv_headers().await;

    p.server
        .send(H2Frame::WindowUpdate {
            stream_id: 1,
            increment: 4,
        })
        .await;
    p.server.expect_quiet().await;

    p.server
        .send(H2Frame::WindowUpdate {
            stream_id: 1,
            increment: 6,
        })
        .await;
    assert_eq!(
        recv_data(&mut p.server).await,
        (1, Bytes::from_static(b"0123456789"), true)
    );

    p.hang_up().await.unwrap();
}

#[tokio::test]
async fn test_connection_window_is_shared_by_all_streams() {
    let mut p = Proxied::start(Config::new()).await;
    set_initial_window(&mut p, 1 << 20).await;

    // Exactly the default connection window.
    p.client.send_headers(1, &request_headers("/big"), false).await;
    p.client
        .send(H2Frame::Data {
            stream_id: 1,
            end_stream: true,
            data: Bytes::from(vec![7u8; 65535]),
        })
        .await;

    p.server.recv_headers().await;
    let mut received = 0;
    let mut ended = false;
    while !ended {
        let (id, data, end_stream) = recv_data(&mut p.server).await;
        assert_eq!(id, 1);
        received += data.len();
        ended = end_stream;
    }
    assert_eq!(received, 65535);

    p.client.send_headers(3, &request_headers("/small"), false).await;
    p.client.send_data(3, b"x", true).await;
    p.server.recv_headers().await;
    p.server.expect_quiet().await;

    p.server
        .send(H2Frame::WindowUpdate {
            stream_id: 0,
            increment: 1,
        })
        .await;
    assert_eq!(recv_data(&mut p.server).await, (3, Bytes::from_static(b"x"), true));

    p.hang_up().await.unwrap();
}

#[tokio::test]
async fn test_initial_window_shrink_blocks_queued_data() {
    let mut p = Proxied::start(Config::new()).await;

    // Use up the connection window on stream 1.
    p.client.send_headers(1, &request_headers("/big"), false).await;
    p.client
        .send(H2Frame::Data {
            stream_id: 1,
            end_stream: true,
            data: Bytes::from(vec![7u8; 65535]),
        })
        .await;
    p.server.recv_headers().await;
    let mut received = 0;
    while received < 65535 {
        received += recv_data(&mut p.server).await.1.len();
    }

    // Stream 3 exists with the default window, its DATA held by the
    // connection window.
    p.client.send_headers(3, &request_headers("/late"), false).await;
    p.client.send_data(3, b"abcdefgh", false).await;
    p.server.recv_headers().await;
    p.server.expect_quiet().await;

    // 65535 -> 5 shrinks stream 3's window below the queued 8 bytes.
    let settings = H2Frame::Settings {
        ack: false,
        settings: vec![(settings_id::INITIAL_WINDOW_SIZE, 5)],
    };
    p.server.send(settings.clone()).await;
    assert_eq!(p.client.recv_skipping_window_updates().await, settings);

    p.server
        .send(H2Frame::WindowUpdate {
            stream_id: 0,
            increment: 100,
        })
        .await;
    p.server.expect_quiet().await;

    p.server
        .send(H2Frame::WindowUpdate {
            stream_id: 3,
            increment: 3,
        })
        .await;
    assert_eq!(
        recv_data(&mut p.server).await,
        (3, Bytes::from_static(b"abcdefgh"), false)
    );

    p.hang_up().await.unwrap();
}

#[tokio::test]
async fn test_data_is_split_by_max_frame_size() {
    let mut p = Proxied::start(Config::new()).await;

    p.client.send_headers(1, &request_headers("/"), false).await;
    p.client
        .send(H2Frame::Data {
            stream_id: 1,
            end_stream: true,
            data: Bytes::from(vec![1u8; 20000]),
        })
        .await;

    p.server.recv_headers().await;
    let (_, first, first_end) = recv_data(&mut p.server).await;
    let (_, second, second_end) = recv_data(&mut p.server).await;
    assert_eq!((first.len(), first_end), (16384, false));
    assert_eq!((second.len(), second_end), (3616, true));

    // A larger limit from the server lets the same payload through whole.
    let settings = H2Frame::Settings {
        ack: false,
        settings: vec![(settings_id::MAX_FRAME_SIZE, 32768)],
    };
    p.server.send(settings.clone()).await;
    assert_eq!(p.client.recv_skipping_window_updates().await, settings);

    p.client.send_headers(3, &request_headers("/"), false).await;
    p.client
        .send(H2Frame::Data {
            stream_id: 3,
            end_stream: true,
            data: Bytes::from(vec![2u8; 20000]),
        })
        .await;
    p.server.recv_headers().await;
    let (id, data, end_stream) = recv_data(&mut p.server).await;
    assert_eq!((id, data.len(), end_stream), (3, 20000, true));

    p.hang_up().await.unwrap();
}
