use super::outbound::session_timeout_ms;
use super::*;
use crate::firmware::mock::MockFirmware;
use crate::firmware::{image_checksum, FirmwareVersion};
use crate::protocol::Frame;
use crate::radio::params::RadioParameters;
use crate::radio::traits::mock::MockTransport;
use futures::executor::block_on;

fn link() -> Link<MockTransport> {
    let mut link = Link::new(MockTransport::new());
    block_on(link.init(&RadioParameters::default())).unwrap();
    link
}

fn data_frame(index: u32, payload: &[u8]) -> Frame {
    FrameSerialiser::new()
        .serialise(&Message::OtaData { index, payload })
        .unwrap()
}

fn test_image(len: usize) -> std::vec::Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Feed one frame to a Sender-role cascade
fn deliver(
    cascade: &mut FirmwareCascade,
    link: &mut Link<MockTransport>,
    firmware: &mut MockFirmware,
    frame: &[u8],
    now: u64,
) -> Option<CascadeEvent> {
    block_on(cascade.on_frame(link, firmware, NodeRole::Sender, frame, now))
}

#[test]
fn test_notify_burst_then_no_requester() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();
    firmware.provide(&[1u8; 10], FirmwareVersion::new(1, 2, 3));

    assert_eq!(
        cascade.begin_notify(&mut firmware),
        Some(CascadeEvent::NotifyStarted)
    );
    assert!(!firmware.has_new_image());
    assert_eq!(cascade.state(), CascadeState::Notifying);
    // A second announcement cannot start while one is running
    assert_eq!(cascade.begin_notify(&mut firmware), None);

    block_on(async {
        cascade.poll(&mut link, &mut firmware, 0).await;
        cascade.poll(&mut link, &mut firmware, 100).await;
        assert_eq!(link.transport().get_tx_history().len(), 1);

        let total = (NOTIFY_REPEATS * NOTIFY_FRAMES_PER_ROUND) as u64;
        for i in 1..total {
            cascade.poll(&mut link, &mut firmware, i * NOTIFY_INTERVAL_MS).await;
        }
    });

    let tx = link.transport().get_tx_history();
    assert_eq!(tx.len(), 30);
    assert_eq!(tx[0].as_slice(), b"FW_UPDATE_AVAILABLE");
    assert_eq!(tx[1].as_slice(), b"FW_VERSION:1.2.3");
    assert_eq!(tx[2].as_slice(), b"UPDATE_NOW");
    assert_eq!(tx[29].as_slice(), b"UPDATE_NOW");
    assert_eq!(cascade.state(), CascadeState::AwaitingRequest);

    let last_tx = 29 * NOTIFY_INTERVAL_MS;
    block_on(async {
        assert_eq!(
            cascade
                .poll(&mut link, &mut firmware, last_tx + REQUEST_WINDOW_MS - 1)
                .await,
            None
        );
        assert_eq!(
            cascade
                .poll(&mut link, &mut firmware, last_tx + REQUEST_WINDOW_MS)
                .await,
            Some(CascadeEvent::Finished(CascadeOutcome::Failed(
                FailureReason::NoRequester
            )))
        );
    });
    assert!(cascade.is_idle());
    assert_eq!(link.transport().get_tx_history().len(), 30);
}

#[test]
fn test_distributor_streams_on_request() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();
    let image = test_image(450);
    firmware.provide(&image, FirmwareVersion::new(0, 2, 0));

    let event = block_on(cascade.on_frame(
        &mut link,
        &mut firmware,
        NodeRole::Receiver,
        b"REQUEST_UPDATE",
        0,
    ));
    assert_eq!(event, Some(CascadeEvent::RequestReceived));
    assert_eq!(cascade.state(), CascadeState::Acked);
    assert!(cascade.is_transmitting());

    let mut now = 0;
    let outcome = block_on(async {
        loop {
            if let Some(CascadeEvent::Finished(outcome)) =
                cascade.poll(&mut link, &mut firmware, now).await
            {
                return outcome;
            }
            now += CHUNK_GAP_MS;
        }
    });
    assert_eq!(outcome, CascadeOutcome::Sent { size: 450 });
    assert_eq!(cascade.last_outcome(), Some(outcome));
    assert!(cascade.is_idle());

    let tx = link.transport().get_tx_history();
    assert_eq!(tx.len(), 6);
    assert_eq!(tx[0].as_slice(), b"UPDATE_ACK");
    let start = std::format!("OTA_START:450:{}", session_timeout_ms(450));
    assert_eq!(tx[1].as_slice(), start.as_bytes());
    assert_eq!(&tx[2][b"OTA_DATA:0:".len()..], &image[..200]);
    assert_eq!(&tx[4][b"OTA_DATA:2:".len()..], &image[400..]);
    let end = std::format!("OTA_END:{:08x}", image_checksum(&image));
    assert_eq!(tx[5].as_slice(), end.as_bytes());
}

#[test]
fn test_distributor_ignores_second_request() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();
    firmware.provide(&test_image(300), FirmwareVersion::new(0, 2, 0));

    block_on(async {
        cascade
            .on_frame(&mut link, &mut firmware, NodeRole::Receiver, b"REQUEST_UPDATE", 0)
            .await;
        cascade.poll(&mut link, &mut firmware, 0).await;
        let again = cascade
            .on_frame(&mut link, &mut firmware, NodeRole::Receiver, b"REQUEST_UPDATE", 10)
            .await;
        assert_eq!(again, None);
    });
    assert_eq!(cascade.state(), CascadeState::Transferring);
    assert_eq!(link.transport().get_tx_history().len(), 1);
}

#[test]
fn test_request_without_image_answers_no_firmware() {
    let mut distributor = FirmwareCascade::new();
    let mut requester = FirmwareCascade::new();
    let mut dist_link = link();
    let mut req_link = link();
    let mut empty = MockFirmware::new();
    let mut firmware = MockFirmware::new();

    assert_eq!(
        deliver(&mut requester, &mut req_link, &mut firmware, b"FW_UPDATE_AVAILABLE", 0),
        Some(CascadeEvent::RequestSent)
    );
    assert_eq!(requester.state(), CascadeState::Requested);
    let request = req_link.transport().take_tx_history();
    assert_eq!(request, [b"REQUEST_UPDATE".to_vec()]);

    let event = block_on(distributor.on_frame(
        &mut dist_link,
        &mut empty,
        NodeRole::Receiver,
        &request[0],
        10,
    ));
    assert_eq!(event, None);
    assert!(distributor.is_idle());
    let reply = dist_link.transport().take_tx_history();
    assert_eq!(reply, [b"NO_FIRMWARE".to_vec()]);

    assert_eq!(
        deliver(&mut requester, &mut req_link, &mut firmware, &reply[0], 20),
        Some(CascadeEvent::Finished(CascadeOutcome::Failed(
            FailureReason::NoFirmware
        )))
    );
    assert!(requester.is_idle());
}

#[test]
fn test_sender_role_ignores_requests() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();
    firmware.provide(&[1u8; 10], FirmwareVersion::new(1, 0, 0));

    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"REQUEST_UPDATE", 0),
        None
    );
    assert!(cascade.is_idle());
    assert!(link.transport().get_tx_history().is_empty());
}

#[test]
fn test_requested_holds_off_and_expires() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();

    deliver(&mut cascade, &mut link, &mut firmware, b"UPDATE_NOW", 1000);
    // Further announcements while waiting send nothing
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"FW_UPDATE_AVAILABLE", 1200),
        None
    );
    assert_eq!(link.transport().get_tx_history().len(), 1);

    deliver(&mut cascade, &mut link, &mut firmware, b"UPDATE_ACK", 1300);
    assert_eq!(cascade.state(), CascadeState::Acked);

    block_on(async {
        assert_eq!(
            cascade
                .poll(&mut link, &mut firmware, 1000 + REQUEST_WINDOW_MS - 1)
                .await,
            None
        );
        assert_eq!(
            cascade
                .poll(&mut link, &mut firmware, 1000 + REQUEST_WINDOW_MS)
                .await,
            Some(CascadeEvent::Finished(CascadeOutcome::Failed(
                FailureReason::NoTransfer
            )))
        );
    });
}

#[test]
fn test_receive_thousand_bytes() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();
    let image = test_image(1000);

    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:1000:5000", 0),
        Some(CascadeEvent::SessionStarted { size: 1000 })
    );
    assert_eq!(cascade.state(), CascadeState::Transferring);

    for (i, chunk) in image.chunks(200).enumerate() {
        let frame = data_frame(i as u32, chunk);
        let event = deliver(&mut cascade, &mut link, &mut firmware, &frame, 100 + i as u64 * 50);
        assert_eq!(
            event,
            Some(CascadeEvent::Progress {
                percent: ((i + 1) * 20) as u8
            })
        );
    }
    assert_eq!(cascade.session().unwrap().received_size(), 1000);

    let event = deliver(&mut cascade, &mut link, &mut firmware, b"OTA_END", 500);
    assert_eq!(
        event,
        Some(CascadeEvent::Finished(CascadeOutcome::Complete { size: 1000 }))
    );
    assert_eq!(firmware.installed, [image]);
    assert!(cascade.is_idle());
    assert!(cascade.session().is_none());
}

#[test]
fn test_start_mid_transfer_restarts() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();
    let first = test_image(1000);
    let second = [0xA5u8; 600];

    deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:1000:5000", 0);
    deliver(&mut cascade, &mut link, &mut firmware, &data_frame(0, &first[..200]), 50);
    deliver(&mut cascade, &mut link, &mut firmware, &data_frame(1, &first[200..400]), 100);

    deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:600:5000", 150);
    let session = cascade.session().unwrap();
    assert_eq!(session.expected_size(), 600);
    assert_eq!(session.received_size(), 0);

    for (i, chunk) in second.chunks(200).enumerate() {
        deliver(&mut cascade, &mut link, &mut firmware, &data_frame(i as u32, chunk), 200);
    }
    let end = std::format!("OTA_END:{:08x}", image_checksum(&second));
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, end.as_bytes(), 300),
        Some(CascadeEvent::Finished(CascadeOutcome::Complete { size: 600 }))
    );
    assert_eq!(firmware.installed, [second.to_vec()]);
}

#[test]
fn test_session_timeout() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();

    deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:1000:1000", 0);
    deliver(&mut cascade, &mut link, &mut firmware, &data_frame(0, &[1u8; 200]), 100);

    block_on(async {
        assert_eq!(cascade.poll(&mut link, &mut firmware, 999).await, None);
        assert_eq!(
            cascade.poll(&mut link, &mut firmware, 1000).await,
            Some(CascadeEvent::Finished(CascadeOutcome::Failed(
                FailureReason::Timeout
            )))
        );
    });
    assert!(cascade.is_idle());
    assert!(cascade.session().is_none());
    assert!(firmware.installed.is_empty());

    // Late chunks after the timeout are ignored
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, &data_frame(1, &[1u8; 200]), 1100),
        None
    );
}

#[test]
fn test_incomplete_and_checksum_failures() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();

    deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:10:5000", 0);
    deliver(&mut cascade, &mut link, &mut firmware, &data_frame(0, b"abc"), 50);
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"OTA_END", 100),
        Some(CascadeEvent::Finished(CascadeOutcome::Failed(
            FailureReason::Incomplete {
                received: 3,
                expected: 10
            }
        )))
    );

    deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:3:5000", 200);
    deliver(&mut cascade, &mut link, &mut firmware, &data_frame(0, b"abc"), 250);
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"OTA_END:00000000", 300),
        Some(CascadeEvent::Finished(CascadeOutcome::Failed(
            FailureReason::Checksum
        )))
    );
    assert!(firmware.installed.is_empty());
}

#[test]
fn test_install_rejected() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();
    firmware.reject_installs = true;

    deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:3:5000", 0);
    deliver(&mut cascade, &mut link, &mut firmware, &data_frame(0, b"abc"), 50);
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"OTA_END", 100),
        Some(CascadeEvent::Finished(CascadeOutcome::Failed(
            FailureReason::InstallRejected
        )))
    );
    assert_eq!(
        cascade.last_outcome(),
        Some(CascadeOutcome::Failed(FailureReason::InstallRejected))
    );
}

#[test]
fn test_stray_frames_ignored() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();

    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, &data_frame(0, b"abc"), 0),
        None
    );
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"OTA_END", 0),
        None
    );
    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:0:5000", 0),
        None
    );
    assert!(cascade.is_idle());
    assert_eq!(cascade.malformed_frames(), 0);

    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"OTA_START:abc", 0),
        None
    );
    assert_eq!(cascade.malformed_frames(), 1);
}

#[test]
fn test_version_advertisement_recorded() {
    let mut cascade = FirmwareCascade::new();
    let mut link = link();
    let mut firmware = MockFirmware::new();

    assert_eq!(
        deliver(&mut cascade, &mut link, &mut firmware, b"FW_VERSION:2.4.1", 0),
        Some(CascadeEvent::VersionAdvertised)
    );
    assert_eq!(cascade.advertised_version(), Some("2.4.1"));
    assert!(cascade.is_idle());
}

#[test]
fn test_stream_between_two_engines() {
    let mut distributor = FirmwareCascade::new();
    let mut requester = FirmwareCascade::new();
    let mut dist_link = link();
    let mut req_link = link();
    let mut dist_fw = MockFirmware::new();
    let mut req_fw = MockFirmware::new();
    let image = test_image(1234);
    dist_fw.provide(&image, FirmwareVersion::new(0, 3, 0));

    let mut now = 0;
    block_on(async {
        requester.request_update(&mut req_link, now).await;
        for frame in req_link.transport().take_tx_history() {
            distributor
                .on_frame(&mut dist_link, &mut dist_fw, NodeRole::Receiver, &frame, now)
                .await;
        }

        while !distributor.is_idle() {
            now += CHUNK_GAP_MS;
            distributor.poll(&mut dist_link, &mut dist_fw, now).await;
            for frame in dist_link.transport().take_tx_history() {
                requester
                    .on_frame(&mut req_link, &mut req_fw, NodeRole::Sender, &frame, now)
                    .await;
            }
        }
    });

    assert_eq!(
        distributor.last_outcome(),
        Some(CascadeOutcome::Sent { size: 1234 })
    );
    assert_eq!(
        requester.last_outcome(),
        Some(CascadeOutcome::Complete { size: 1234 })
    );
    assert_eq!(req_fw.installed, [image]);
}
