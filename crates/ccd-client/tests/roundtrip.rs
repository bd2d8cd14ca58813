//! Client engine against a live in-process daemon.

use ccd_client::{Client, ClientConfig, ClientError};
use ccd_core::driver::DriverFactory;
use ccd_driver_mock::MockFactory;
use ccd_server::{capture, serve, Daemon, RawFrameWriter, ServerSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_daemon(dir: &tempfile::TempDir) -> String {
    let mut settings = ServerSettings::default();
    settings.shmem_dir = dir.path().to_path_buf();
    settings.data_dir = dir.path().to_path_buf();
    settings.shmem_key = "client-test".to_string();
    settings.capture.idle_poll_ms = 5;
    settings.capture.poll_min_ms = 2;
    settings.capture.temp_log_interval_s = 3600;

    let config: toml::Value =
        toml::from_str("[camera]\nwidth = 16\nheight = 16\noverscan = 0\nreadout_s = 0.0\nseed = 3")
            .unwrap();
    let devices = MockFactory.build(config).await.unwrap();
    let daemon = Daemon::new(settings, devices, Arc::new(RawFrameWriter))
        .await
        .unwrap();

    capture::spawn(daemon.clone());
    serve::spawn_notifier(daemon.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(serve::run_tcp(daemon, listener));
    addr
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        response_timeout: Duration::from_secs(5),
        busy_retries: 10,
        busy_backoff: Duration::from_millis(20),
        probe_interval: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn set_then_report_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_daemon(&dir).await;
    let mut client = Client::connect_with(&addr, fast_config()).await.unwrap();

    let echoed = client.send_ok("exptime=1.25").await.unwrap();
    assert_eq!(echoed.as_deref(), Some("1.25"));
    assert_eq!(client.get("exptime").await.unwrap(), "1.25");

    // BADKEY surfaces as a refusal, not a transport error.
    let err = client.send_ok("nonsense").await.unwrap_err();
    assert!(matches!(err, ClientError::Refused { .. }));
}

#[tokio::test]
async fn full_exposure_with_written_frame() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_daemon(&dir).await;
    let mut client = Client::connect_with(&addr, fast_config()).await.unwrap();

    client.send_ok("filenameprefix=cap_").await.unwrap();
    let written = client.expose(0.02).await.unwrap();
    let written = written.expect("no filename announced");
    assert!(written.contains("cap_"));
    assert!(std::path::Path::new(&written).exists());

    // The daemon is back to Idle and ready for another run.
    assert_eq!(client.get("expstate").await.unwrap(), "0");
}

#[tokio::test]
async fn exposure_without_filename_completes_silently() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_daemon(&dir).await;
    let mut client = Client::connect_with(&addr, fast_config()).await.unwrap();

    let written = client.expose(0.02).await.unwrap();
    assert!(written.is_none());
}

#[tokio::test]
async fn cancel_stops_a_long_exposure() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_daemon(&dir).await;
    let mut client = Client::connect_with(&addr, fast_config()).await.unwrap();

    client.send_ok("exptime=30").await.unwrap();
    client.send_ok("expstate=1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.get("expstate").await.unwrap(), "1");

    client.cancel().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.get("expstate").await.unwrap(), "0");
}

#[tokio::test]
async fn busy_replies_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_daemon(&dir).await;
    let mut client = Client::connect_with(&addr, fast_config()).await.unwrap();

    client.send_ok("exptime=0.1").await.unwrap();
    client.send_ok("expstate=1").await.unwrap();
    // A setter during the exposure gets BUSY; retries outlast the
    // exposure and eventually succeed.
    let echoed = client.send_ok("gain=20").await.unwrap();
    assert_eq!(echoed.as_deref(), Some("20"));
}
