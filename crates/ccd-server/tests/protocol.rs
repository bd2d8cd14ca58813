//! End-to-end protocol tests against the simulated rig.

use ccd_core::image::{ImageHeader, IMAGE_MAGIC};
use ccd_core::protocol::ResultCode;
use ccd_driver_mock::MockFactory;
use ccd_server::{capture, dispatch_line, serve, Daemon, RawFrameWriter, ServerSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, TcpStream};

use ccd_core::driver::DriverFactory;

async fn test_daemon(dir: &tempfile::TempDir) -> Arc<Daemon> {
    let mut settings = ServerSettings::default();
    settings.shmem_dir = dir.path().to_path_buf();
    settings.data_dir = dir.path().to_path_buf();
    settings.shmem_key = "test".to_string();
    settings.capture.idle_poll_ms = 5;
    settings.capture.poll_min_ms = 2;
    settings.capture.temp_log_interval_s = 3600;

    let config: toml::Value = toml::from_str(
        "[camera]\nwidth = 32\nheight = 24\noverscan = 2\nreadout_s = 0.0\nseed = 7",
    )
    .unwrap();
    let devices = MockFactory.build(config).await.unwrap();
    Daemon::new(settings, devices, Arc::new(RawFrameWriter))
        .await
        .unwrap()
}

async fn send(daemon: &Daemon, line: &str) -> (Vec<String>, ResultCode) {
    let mut out = Vec::new();
    let code = dispatch_line(daemon, line, &mut out).await;
    (out, code)
}

#[tokio::test]
async fn setters_report_device_truth() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;

    let (out, code) = send(&daemon, "exptime=2.5").await;
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(out, vec!["exptime=2.5"]);

    // Idempotent read: bare key returns the same value.
    let (out, code) = send(&daemon, "exptime").await;
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(out, vec!["exptime=2.5"]);

    let (out, code) = send(&daemon, "gain=63").await;
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(out, vec!["gain=63"]);

    // Out-of-range scalar is the client's fault.
    let (_, code) = send(&daemon, "gain=9999").await;
    assert_eq!(code, ResultCode::BadValue);
    let (out, _) = send(&daemon, "gain").await;
    assert_eq!(out, vec!["gain=63"]);
}

#[tokio::test]
async fn unknown_key_is_badkey() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;
    let (out, code) = send(&daemon, "foobar").await;
    assert_eq!(code, ResultCode::BadKey);
    assert!(out.is_empty());
}

#[tokio::test]
async fn format_clamps_and_leaves_maxformat_alone() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;

    let (max_before, _) = send(&daemon, "maxformat").await;
    // 32x24 with 2 overscan on each edge.
    assert_eq!(max_before, vec!["maxformat=0,0,36,28"]);

    let (out, code) = send(&daemon, "format=10,10,10000,10000").await;
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(out, vec!["format=10,10,36,28"]);

    let (max_after, _) = send(&daemon, "maxformat").await;
    assert_eq!(max_after, max_before);

    let (_, code) = send(&daemon, "format=1,2,3").await;
    assert_eq!(code, ResultCode::BadValue);
}

#[tokio::test]
async fn mutating_commands_are_busy_while_capturing() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;

    {
        let mut shared = daemon.lock().await;
        shared.state = ccd_core::CaptureState::Capturing;
    }

    let (_, code) = send(&daemon, "gain=5").await;
    assert_eq!(code, ResultCode::Busy);
    let (_, code) = send(&daemon, "object=M31").await;
    assert_eq!(code, ResultCode::Busy);

    // Getters and capture-control keys still work.
    let (out, code) = send(&daemon, "expstate").await;
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(out, vec!["expstate=1"]);
    let (_, code) = send(&daemon, "gain").await;
    assert_eq!(code, ResultCode::Ok);

    // Cancel must get through mid-capture.
    let (_, code) = send(&daemon, "expstate=0").await;
    assert_eq!(code, ResultCode::Ok);
}

#[tokio::test]
async fn exposure_reaches_frame_ready_with_one_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;
    let mut notifications = daemon.notifications();
    capture::spawn(daemon.clone());
    serve::spawn_notifier(daemon.clone());

    let (_, code) = send(&daemon, "exptime=0.02").await;
    assert_eq!(code, ResultCode::Ok);
    let (_, code) = send(&daemon, "filenameprefix=cap_").await;
    assert_eq!(code, ResultCode::Ok);
    let (_, code) = send(&daemon, "expstate=1").await;
    assert_eq!(code, ResultCode::Ok);

    let first = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .expect("no broadcast")
        .unwrap();
    assert_eq!(first, "expstate=2");
    let second = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .expect("no filename broadcast")
        .unwrap();
    assert!(second.starts_with("lastfilename="), "{second}");

    // The notifier reset the machine; a new exposure is legal.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (out, _) = send(&daemon, "expstate").await;
    assert_eq!(out, vec!["expstate=0"]);

    // Exactly once: nothing further arrives.
    assert!(notifications.try_recv().is_err());

    // The frame landed in the segment with stats stamped.
    let shared = daemon.lock().await;
    let header = shared.segment.header();
    assert_eq!(header.counter, 1);
    assert_eq!(header.stats_valid, 1);
    assert_eq!((header.width, header.height), (36, 28));
    assert_eq!(header.data_len, 36 * 28 * 2);
}

#[tokio::test]
async fn cancel_mid_flight_skips_the_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;
    let mut notifications = daemon.notifications();
    capture::spawn(daemon.clone());
    serve::spawn_notifier(daemon.clone());

    send(&daemon, "exptime=5").await;
    let (_, code) = send(&daemon, "expstate=1").await;
    assert_eq!(code, ResultCode::Ok);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (out, _) = send(&daemon, "expstate").await;
    assert_eq!(out, vec!["expstate=1"]);

    let (_, code) = send(&daemon, "expstate=0").await;
    assert_eq!(code, ResultCode::Ok);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (out, _) = send(&daemon, "expstate").await;
    assert_eq!(out, vec!["expstate=0"]);
    // No FrameReady (or any) broadcast for the cancelled cycle.
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn cancel_lands_within_one_idle_interval() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;
    capture::spawn(daemon.clone());
    serve::spawn_notifier(daemon.clone());

    // A long exposure parks the driver loop at its slowest re-poll
    // cadence; the cancel must still cut through that sleep.
    send(&daemon, "exptime=30").await;
    let (_, code) = send(&daemon, "expstate=1").await;
    assert_eq!(code, ResultCode::Ok);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let (out, _) = send(&daemon, "expstate").await;
    assert_eq!(out, vec!["expstate=1"]);

    let requested = std::time::Instant::now();
    let (_, code) = send(&daemon, "expstate=0").await;
    assert_eq!(code, ResultCode::Ok);
    loop {
        let (out, _) = send(&daemon, "expstate").await;
        if out == vec!["expstate=0"] {
            break;
        }
        assert!(
            requested.elapsed() < Duration::from_millis(200),
            "cancel still pending after {:?}",
            requested.elapsed()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn metadata_round_trip_and_getheaders() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;

    // Every setter-shaped key is also a getter, even when unset.
    let (out, code) = send(&daemon, "observer").await;
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(out, vec!["observer="]);

    send(&daemon, "object=M31").await;
    send(&daemon, "observer=rws").await;
    let (out, code) = send(&daemon, "getheaders").await;
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(out, vec!["object=M31", "observer=rws"]);
}

#[tokio::test]
async fn command_socket_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;
    capture::spawn(daemon.clone());
    serve::spawn_notifier(daemon.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve::run_tcp(daemon.clone(), listener));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"exptime=1.5\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "exptime=1.5");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK");

    write_half.write_all(b"foobar\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "BADKEY");

    // Connection survives the bad key.
    write_half.write_all(b"expstate\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "expstate=0");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK");
}

#[tokio::test]
async fn client_cap_refuses_excess_connections() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = ServerSettings::default();
    settings.shmem_dir = dir.path().to_path_buf();
    settings.shmem_key = "cap".to_string();
    settings.max_clients = 1;
    let devices = MockFactory
        .build(toml::Value::Table(Default::default()))
        .await
        .unwrap();
    let daemon = Daemon::new(settings, devices, Arc::new(RawFrameWriter))
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve::run_tcp(daemon.clone(), listener));

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"info\n").await.unwrap();
    let mut byte = [0u8; 1];
    first.read_exact(&mut byte).await.unwrap();

    // Second connection is accepted then immediately closed.
    let mut second = TcpStream::connect(addr).await.unwrap();
    let n = tokio::time::timeout(Duration::from_secs(2), second.read(&mut byte))
        .await
        .expect("refusal not observed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn image_socket_is_one_shot() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;
    capture::spawn(daemon.clone());
    serve::spawn_notifier(daemon.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    serve::spawn_image_listener(daemon.clone(), listener);

    // Capture one frame so the segment holds real pixels.
    let mut notifications = daemon.notifications();
    send(&daemon, "exptime=0.02").await;
    send(&daemon, "expstate=1").await;
    tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .expect("no broadcast")
        .unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut header_bytes = [0u8; ImageHeader::SIZE];
    stream.read_exact(&mut header_bytes).await.unwrap();
    let header = ImageHeader::from_bytes(&header_bytes);
    assert_eq!(header.magic, IMAGE_MAGIC);
    assert_eq!(header.counter, 1);

    let mut payload = vec![0u8; header.data_len as usize];
    stream.read_exact(&mut payload).await.unwrap();
    assert!(payload.iter().any(|&b| b != 0));

    // Server closes after the payload; nothing more arrives.
    let mut extra = [0u8; 1];
    assert_eq!(stream.read(&mut extra).await.unwrap(), 0);
}

#[tokio::test]
async fn line_buffer_overflow_drops_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(&dir).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve::run_tcp(daemon.clone(), listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Far past line_buffer_max without a newline.
    let junk = vec![b'x'; 8192];
    stream.write_all(&junk).await.unwrap();

    let mut byte = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut byte))
        .await
        .expect("overflow not observed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}
