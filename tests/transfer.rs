//! End-to-end transfers through running worker threads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use window_relay::client;
use window_relay::config::Config;
use window_relay::runtime::{self, LoopEvent, RecordingObserver, TransportId};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "window-relay-it-{}-{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn wait_for(observer: &RecordingObserver, done: impl Fn(&[(TransportId, LoopEvent)]) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done(&observer.events()) {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out: {:?}", observer.events());
}

fn count(events: &[(TransportId, LoopEvent)], kind: &str) -> usize {
    events.iter().filter(|(_, e)| e.kind() == kind).count()
}

#[test]
fn test_files_received_by_several_workers() {
    let output_dir = scratch_dir("workers");
    let source_dir = scratch_dir("workers-src");
    let config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        workers: 2,
        buffer_size: 64,
        acknowledge: true,
        output_dir: output_dir.clone(),
        ..Config::default()
    };

    let observer = Arc::new(RecordingObserver::new());
    let workers = runtime::spawn(&config, observer.clone()).unwrap();
    assert_eq!(workers.len(), 2);
    let addr = workers.local_addr();

    let mut expected = Vec::new();
    for i in 0..4u8 {
        let data: Vec<u8> = (0..1000u32).map(|n| (n as u8).wrapping_add(i)).collect();
        let path = source_dir.join(format!("src-{i}.bin"));
        std::fs::write(&path, &data).unwrap();

        let reply = client::send_file(addr, &path, 100, true).unwrap();
        assert_eq!(reply.as_deref(), Some("received\n"));
        expected.push(data);
    }

    wait_for(&observer, |e| count(e, "closed") >= 4);

    let mut received: Vec<Vec<u8>> = (1..=4)
        .map(|seq| std::fs::read(output_dir.join(format!("recv-{seq}.bin"))).unwrap())
        .collect();
    received.sort();
    expected.sort();
    assert_eq!(received, expected);

    let handle = workers.shutdown_handle();
    handle.shutdown();
    workers.join();
    assert!(handle.is_shutdown());
    assert_eq!(count(&observer.events(), "shutdown"), 2);
}

#[test]
fn test_datagram_and_stream_side_by_side() {
    let output_dir = scratch_dir("mixed");
    let config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        datagram_listen: Some("127.0.0.1:0".parse().unwrap()),
        output_dir: output_dir.clone(),
        ..Config::default()
    };

    let observer = Arc::new(RecordingObserver::new());
    let workers = runtime::spawn(&config, observer.clone()).unwrap();
    let datagram_addr = workers.datagram_addr().unwrap();

    client::send_datagram(datagram_addr, "status ok").unwrap();
    wait_for(&observer, |e| count(e, "datagram") == 1);

    let source = output_dir.join("outgoing.txt");
    std::fs::write(&source, "streamed text").unwrap();
    assert_eq!(
        client::send_file(workers.local_addr(), &source, 8, false).unwrap(),
        None
    );
    wait_for(&observer, |e| count(e, "completed") == 1);

    let payload = observer
        .events_for(TransportId::DATAGRAM)
        .into_iter()
        .find_map(|e| match e {
            LoopEvent::Datagram { payload, .. } => Some(payload),
            _ => None,
        })
        .unwrap();
    assert!(String::from_utf8_lossy(&payload).ends_with("\nstatus ok"));
    assert_eq!(
        std::fs::read_to_string(output_dir.join("recv-1.bin")).unwrap(),
        "streamed text"
    );

    let handle = workers.shutdown_handle();
    handle.shutdown();
    workers.join();
}
