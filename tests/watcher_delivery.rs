//! File watcher delivery behavior against a real file on disk.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use fl_sidecar::watcher::FileWatcher;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn temp_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fl-sidecar-{tag}-{}.txt", process::id()))
}

async fn recv_within(rx: &mut mpsc::Receiver<Vec<u8>>, wait: Duration) -> Option<Vec<u8>> {
    timeout(wait, rx.recv()).await.ok().flatten()
}

#[tokio::test(flavor = "multi_thread")]
async fn delivers_initial_and_rewritten_content() {
    let path = temp_path("rewrite");
    tokio::fs::write(&path, "1,0.9,0.10").await.unwrap();

    let mut updates = FileWatcher::new(&path)
        .poll_every(Duration::from_millis(20))
        .start();

    let first = recv_within(&mut updates, Duration::from_secs(2)).await;
    assert_eq!(first.as_deref(), Some(b"1,0.9,0.10".as_slice()));

    tokio::fs::write(&path, "2,0.7,0.35").await.unwrap();
    let second = recv_within(&mut updates, Duration::from_secs(2)).await;
    assert_eq!(second.as_deref(), Some(b"2,0.7,0.35".as_slice()));

    tokio::fs::remove_file(&path).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_content_is_not_redelivered() {
    let path = temp_path("unchanged");
    tokio::fs::write(&path, "5,0.5,0.50").await.unwrap();

    let mut updates = FileWatcher::new(&path)
        .poll_every(Duration::from_millis(20))
        .start();

    assert!(
        recv_within(&mut updates, Duration::from_secs(2))
            .await
            .is_some()
    );

    // Several poll cycles with identical content: nothing new arrives.
    assert!(
        recv_within(&mut updates, Duration::from_millis(200))
            .await
            .is_none()
    );

    tokio::fs::remove_file(&path).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn task_stops_when_receiver_dropped() {
    let path = temp_path("stop");
    tokio::fs::write(&path, "1,0.9,0.10").await.unwrap();

    let baseline = tokio::runtime::Handle::current()
        .metrics()
        .num_alive_tasks();

    let mut updates = FileWatcher::new(&path)
        .poll_every(Duration::from_millis(20))
        .start();
    assert!(
        recv_within(&mut updates, Duration::from_secs(2))
            .await
            .is_some()
    );

    // Even with the file unchanged, the polling task must notice the closed
    // channel and exit rather than tick for the rest of the process.
    drop(updates);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let alive = tokio::runtime::Handle::current()
            .metrics()
            .num_alive_tasks();
        if alive <= baseline {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watcher task still alive after receiver drop: baseline={baseline}, now={alive}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::fs::remove_file(&path).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn tolerates_missing_file_until_first_write() {
    let path = temp_path("late");
    tokio::fs::remove_file(&path).await.ok();

    let mut updates = FileWatcher::new(&path)
        .poll_every(Duration::from_millis(20))
        .start();

    assert!(
        recv_within(&mut updates, Duration::from_millis(200))
            .await
            .is_none()
    );

    tokio::fs::write(&path, "1,0.8,0.20").await.unwrap();
    let delivered = recv_within(&mut updates, Duration::from_secs(2)).await;
    assert_eq!(delivered.as_deref(), Some(b"1,0.8,0.20".as_slice()));

    tokio::fs::remove_file(&path).await.ok();
}
