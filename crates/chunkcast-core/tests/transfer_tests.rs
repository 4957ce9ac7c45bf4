//! End-to-end transfer tests.
//!
//! A sharer and a receiver run in the same process and talk over loopback
//! UDP, with data frames sent to 127.0.0.1 instead of the broadcast address.

mod common;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;

use chunkcast_core::catalog::FileDescriptor;
use chunkcast_core::config::LossConfig;
use chunkcast_core::crypto::checksum_bytes;
use chunkcast_core::protocol::{DataFrame, FileId, Request, Response, ACK_RESENDING};
use chunkcast_core::receiver::{Receiver, TransferState};
use chunkcast_core::sharer::Sharer;
use chunkcast_core::transport::ReceiverTransport;
use chunkcast_core::Error;

use common::{create_temp_dir, create_test_file, loopback_config, random_bytes, wait_for_state};

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::test]
async fn test_file_transfers_over_loopback() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let content = random_bytes(250_500);
    let path = create_test_file(source_dir.path(), "video.bin", &content);
    let config = loopback_config(downloads_dir.path());

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    let descriptor = sharer.register(&path).await.expect("register");
    let handle = sharer.spawn();

    let receiver = Receiver::bind(&config).await.expect("bind receiver");
    let files = receiver.refresh_listing().await.expect("listing");
    assert_eq!(files, vec![descriptor.clone()]);
    assert_eq!(files[0].parts, 251);

    receiver.request_file(&descriptor.id).await.expect("request");
    assert!(
        wait_for_state(&receiver, &descriptor.id, TransferState::Complete, COMPLETION_TIMEOUT).await,
        "transfer did not complete"
    );

    let received = std::fs::read(downloads_dir.path().join("video.bin")).expect("final file");
    assert_eq!(received, content);
    assert!(!downloads_dir.path().join("video.bin.tmp").exists());

    receiver.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_lossy_transfer_recovers_missing_pieces() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let content = random_bytes(120_000);
    let path = create_test_file(source_dir.path(), "lossy.bin", &content);
    let mut config = loopback_config(downloads_dir.path());
    config.loss = LossConfig::with_probability(0.2);

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    let descriptor = sharer.register(&path).await.expect("register");
    let handle = sharer.spawn();

    let receiver = Receiver::bind(&config).await.expect("bind receiver");
    receiver.refresh_listing().await.expect("listing");
    receiver.request_file(&descriptor.id).await.expect("request");

    assert!(
        wait_for_state(&receiver, &descriptor.id, TransferState::Complete, COMPLETION_TIMEOUT).await,
        "lossy transfer did not recover"
    );
    assert_eq!(
        std::fs::read(downloads_dir.path().join("lossy.bin")).unwrap(),
        content
    );

    receiver.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_total_loss_then_fresh_request_completes() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let content = random_bytes(30_000);
    let path = create_test_file(source_dir.path(), "retry.bin", &content);
    let mut config = loopback_config(downloads_dir.path());
    config.loss = LossConfig::with_probability(1.0);

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    let descriptor = sharer.register(&path).await.expect("register");
    let handle = sharer.spawn();

    let receiver = Receiver::bind(&config).await.expect("bind receiver");
    receiver.refresh_listing().await.expect("listing");
    receiver.request_file(&descriptor.id).await.expect("request");

    assert!(
        !wait_for_state(
            &receiver,
            &descriptor.id,
            TransferState::Complete,
            Duration::from_millis(1500)
        )
        .await
    );
    assert_eq!(
        receiver.state(&descriptor.id).await,
        Some(TransferState::Idle)
    );

    sharer.set_loss(LossConfig::disabled());
    receiver.refresh_listing().await.expect("refresh");
    receiver.request_file(&descriptor.id).await.expect("request again");

    assert!(
        wait_for_state(&receiver, &descriptor.id, TransferState::Complete, COMPLETION_TIMEOUT).await,
        "fresh transfer did not complete"
    );
    assert_eq!(
        std::fs::read(downloads_dir.path().join("retry.bin")).unwrap(),
        content
    );

    receiver.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_manual_request_missing_fills_gaps() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let content = random_bytes(100_000);
    let path = create_test_file(source_dir.path(), "gaps.bin", &content);
    let mut config = loopback_config(downloads_dir.path());
    config.loss = LossConfig::with_probability(0.5);
    config.recovery.enabled = false;

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    let descriptor = sharer.register(&path).await.expect("register");
    let handle = sharer.spawn();

    let receiver = Receiver::bind(&config).await.expect("bind receiver");
    receiver.refresh_listing().await.expect("listing");
    receiver.request_file(&descriptor.id).await.expect("request");

    assert!(
        wait_for_state(
            &receiver,
            &descriptor.id,
            TransferState::Receiving,
            Duration::from_secs(5)
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(
        receiver.state(&descriptor.id).await,
        Some(TransferState::Receiving)
    );
    let progress = receiver.progress(&descriptor.id).await.unwrap();
    assert!(progress.received < progress.parts);

    sharer.set_loss(LossConfig::disabled());
    let deadline = tokio::time::Instant::now() + COMPLETION_TIMEOUT;
    loop {
        receiver.request_missing(&descriptor.id).await.expect("request missing");
        if wait_for_state(
            &receiver,
            &descriptor.id,
            TransferState::Complete,
            Duration::from_secs(1),
        )
        .await
        {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "gaps never filled");
    }

    receiver.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_get_unknown_file_sends_no_frames() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let path = create_test_file(source_dir.path(), "known.bin", &random_bytes(5_000));
    let config = loopback_config(downloads_dir.path());

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    sharer.register(&path).await.expect("register");
    let handle = sharer.spawn();

    let transport = ReceiverTransport::bind(&config.network).await.expect("bind");
    let client = chunkcast_core::receiver::ControlClient::new(
        transport.control,
        transport.server,
        config.network.request_timeout,
    );

    let unknown: FileId = "ffffffff".parse().unwrap();
    let err = client.get(&unknown).await.unwrap_err();
    assert!(matches!(err, Error::UnknownFile(ref id) if id == "ffffffff"));

    let mut buf = vec![0u8; 2048];
    let frame = tokio::time::timeout(
        Duration::from_millis(500),
        transport.data.recv_from(&mut buf),
    )
    .await;
    assert!(frame.is_err(), "no data frame expected");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_listing_order_and_capacity() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let config = loopback_config(downloads_dir.path());

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    for i in 0..5 {
        let path = create_test_file(source_dir.path(), &format!("file{i}.txt"), &random_bytes(100));
        sharer.register(&path).await.expect("register");
    }
    let extra = create_test_file(source_dir.path(), "file5.txt", &random_bytes(100));
    assert!(matches!(
        sharer.register(&extra).await,
        Err(Error::CapacityExceeded { max: 5 })
    ));
    assert!(matches!(
        sharer.register_selection(None).await,
        Err(Error::NoSelection)
    ));
    assert_eq!(sharer.files().await.len(), 5);
    let handle = sharer.spawn();

    let receiver = Receiver::bind(&config).await.expect("bind receiver");
    let names: Vec<_> = receiver
        .refresh_listing()
        .await
        .expect("listing")
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(
        names,
        vec!["file0.txt", "file1.txt", "file2.txt", "file3.txt", "file4.txt"]
    );

    receiver.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_zero_byte_file_completes_on_request() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let path = create_test_file(source_dir.path(), "empty.txt", b"");
    let config = loopback_config(downloads_dir.path());

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    let descriptor = sharer.register(&path).await.expect("register");
    let handle = sharer.spawn();

    let receiver = Receiver::bind(&config).await.expect("bind receiver");
    receiver.refresh_listing().await.expect("listing");
    receiver.request_file(&descriptor.id).await.expect("request");

    assert!(
        wait_for_state(&receiver, &descriptor.id, TransferState::Complete, Duration::from_secs(5)).await
    );
    assert_eq!(
        std::fs::read(downloads_dir.path().join("empty.txt")).unwrap(),
        b""
    );

    receiver.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_status_updates_describe_lifecycle() {
    let source_dir = create_temp_dir();
    let downloads_dir = create_temp_dir();
    let path = create_test_file(source_dir.path(), "status.bin", &random_bytes(5_000));
    let config = loopback_config(downloads_dir.path());

    let sharer = Sharer::bind(&config).await.expect("bind sharer");
    let descriptor = sharer.register(&path).await.expect("register");
    let handle = sharer.spawn();

    let mut receiver = Receiver::bind(&config).await.expect("bind receiver");
    let mut updates = receiver.take_status_updates().expect("status stream");
    assert!(receiver.take_status_updates().is_none());

    receiver.refresh_listing().await.expect("listing");
    receiver.request_file(&descriptor.id).await.expect("request");

    let mut seen = Vec::new();
    let collected = tokio::time::timeout(COMPLETION_TIMEOUT, async {
        while let Some(update) = updates.recv().await {
            assert_eq!(update.file_id, descriptor.id);
            let text = update.status.to_string();
            let done = text.starts_with("Downloaded in ") || text == "Corrupted";
            seen.push(text);
            if done {
                break;
            }
        }
    })
    .await;

    assert!(collected.is_ok(), "no final status, saw {seen:?}");
    assert_eq!(seen.first().map(String::as_str), Some("Receiving"));
    assert!(seen.iter().any(|s| s == "Verifying"));
    assert!(seen.last().unwrap().starts_with("Downloaded in "));

    receiver.shutdown().await;
    handle.shutdown().await;
}

/// Count `PARTS` requests arriving on `socket` within `window`.
async fn count_parts_requests(socket: &UdpSocket, window: Duration) -> usize {
    let mut buf = vec![0u8; 4096];
    let deadline = tokio::time::Instant::now() + window;
    let mut count = 0;
    while let Ok(Ok((len, _))) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
        if matches!(Request::decode(&buf[..len]), Ok(Request::Parts { .. })) {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn test_silent_sharer_gets_no_stale_retransmissions() {
    let downloads_dir = create_temp_dir();
    let content = random_bytes(300_000);
    let mut config = loopback_config(downloads_dir.path());
    config.network.request_timeout = Duration::from_millis(300);
    let data_target = SocketAddr::from((Ipv4Addr::LOCALHOST, config.network.data_port));

    let sum = checksum_bytes(&content);
    let descriptor = FileDescriptor {
        id: FileId::from_checksum(&sum).unwrap(),
        name: "silent.bin".into(),
        size: content.len() as u64,
        parts: 300,
        sum,
    };
    let id = descriptor.id;
    let frame = |index: u32| {
        let start = index as usize * 1000;
        DataFrame {
            id,
            index,
            payload: content[start..start + 1000].to_vec(),
        }
        .encode()
    };

    let sharer = UdpSocket::bind((Ipv4Addr::LOCALHOST, config.network.control_port))
        .await
        .unwrap();
    let data_out = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let receiver = Receiver::bind(&config).await.expect("bind receiver");

    let answer_listing = async {
        let mut buf = [0u8; 64];
        let (len, from) = sharer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"LIST PLS");
        let listing = Response::listing(std::slice::from_ref(&descriptor)).unwrap();
        sharer.send_to(&listing.encode(), from).await.unwrap();
    };
    let (files, ()) = tokio::join!(receiver.refresh_listing(), answer_listing);
    assert_eq!(files.expect("listing"), vec![descriptor.clone()]);

    data_out.send_to(&frame(0), data_target).await.unwrap();
    assert!(wait_for_state(&receiver, &id, TransferState::Receiving, Duration::from_secs(2)).await);

    // The sharer ignores every PARTS request while the transfer stalls
    let during_stall = count_parts_requests(&sharer, Duration::from_secs(3)).await;
    assert!(during_stall > 0, "stalled transfer never asked for pieces");

    // Deliver the rest, resending anything the receiver still asks for
    for index in 1..300 {
        data_out.send_to(&frame(index), data_target).await.unwrap();
        if index % 50 == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    {
        let completed = wait_for_state(&receiver, &id, TransferState::Complete, COMPLETION_TIMEOUT);
        tokio::pin!(completed);
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                done = &mut completed => {
                    assert!(done, "transfer did not complete");
                    break;
                }
                Ok((len, from)) = sharer.recv_from(&mut buf) => {
                    if let Ok(Request::Parts { indices, .. }) = Request::decode(&buf[..len]) {
                        sharer.send_to(&Response::ack(ACK_RESENDING).encode(), from).await.unwrap();
                        for index in indices {
                            data_out.send_to(&frame(index), data_target).await.unwrap();
                        }
                    }
                }
            }
        }
    }

    // Let an exchange already on the wire land, then expect silence
    count_parts_requests(&sharer, Duration::from_millis(200)).await;
    let after_complete = count_parts_requests(&sharer, Duration::from_millis(1500)).await;
    assert_eq!(after_complete, 0, "retransmissions sent after completion");
    assert_eq!(
        std::fs::read(downloads_dir.path().join("silent.bin")).unwrap(),
        content
    );

    receiver.shutdown().await;
}
