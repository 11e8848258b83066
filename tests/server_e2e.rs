// End-to-end test: a real server on a real UNIX socket, driven through
// the wire protocol, shut down with SIGHUP, and checked against its exit
// report and operation log.
//
// Everything lives in one test function: the shutdown signal is
// process-wide, so concurrent server instances would tear each other
// down.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use stashd::cache::codec::CodecKind;
use stashd::cache::policy::ReplacementPolicy;
use stashd::cache::store::OpenFlags;
use stashd::config::Settings;
use stashd::protocol::response::{self, ResponseCode};
use stashd::protocol::wire;
use stashd::protocol::Request;
use stashd::server::Server;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("stashd-e2e-{}-{name}", std::process::id()))
}

fn connect(socket: &PathBuf) -> UnixStream {
    // The server thread needs a moment to bind.
    for _ in 0..200 {
        if let Ok(stream) = UnixStream::connect(socket) {
            return stream;
        }
        thread::sleep(Duration::from_millis(25));
    }
    panic!("server never came up on {}", socket.display());
}

fn send(stream: &mut UnixStream, request: &Request) {
    request.write_to(stream).unwrap();
    stream.flush().unwrap();
}

fn expect_code(stream: &mut UnixStream, expected: ResponseCode) {
    let code = response::read_code(stream).unwrap();
    assert_eq!(code, expected);
}

#[test]
fn full_protocol_session() {
    let socket = temp_path("socket.sk");
    let log = temp_path("log.json");
    let _ = std::fs::remove_file(&socket);
    let _ = std::fs::remove_file(&log);

    let settings = Settings {
        max_file_count: 2,
        max_bytes: 10,
        pool_size: 3,
        backlog: 8,
        task_queue_capacity: 64,
        log_queue_capacity: 1024,
        replacement_policy: ReplacementPolicy::Fifo,
        socket_path: socket.clone(),
        log_path: log.clone(),
        compression: CodecKind::Identity,
    };

    let server = thread::spawn(move || Server::new(settings).run().unwrap());

    let create_lock = OpenFlags {
        create: true,
        lock: true,
    };

    let mut alice = connect(&socket);

    // Create, initial write, read back.
    send(
        &mut alice,
        &Request::Open {
            path: b"/f1".to_vec(),
            flags: create_lock,
        },
    );
    expect_code(&mut alice, ResponseCode::Ok);

    send(
        &mut alice,
        &Request::Write {
            path: b"/f1".to_vec(),
            content: b"abcde".to_vec(),
        },
    );
    expect_code(&mut alice, ResponseCode::Ok);
    assert!(response::read_file_list(&mut alice).unwrap().is_empty());

    send(&mut alice, &Request::Read { path: b"/f1".to_vec() });
    expect_code(&mut alice, ResponseCode::Ok);
    assert_eq!(wire::read_segment(&mut alice).unwrap(), b"abcde");

    // A second client is walled off by Alice's lock.
    let mut bob = connect(&socket);
    send(
        &mut bob,
        &Request::Open {
            path: b"/f1".to_vec(),
            flags: OpenFlags::default(),
        },
    );
    expect_code(&mut bob, ResponseCode::Ok);

    send(&mut bob, &Request::Read { path: b"/f1".to_vec() });
    expect_code(&mut bob, ResponseCode::Forbidden);

    send(&mut alice, &Request::Unlock { path: b"/f1".to_vec() });
    expect_code(&mut alice, ResponseCode::Ok);

    send(&mut bob, &Request::Read { path: b"/f1".to_vec() });
    expect_code(&mut bob, ResponseCode::Ok);
    assert_eq!(wire::read_segment(&mut bob).unwrap(), b"abcde");

    // Lock contention: Bob blocks until Alice unlocks.
    send(&mut alice, &Request::Lock { path: b"/f1".to_vec() });
    expect_code(&mut alice, ResponseCode::Ok);

    send(&mut bob, &Request::Lock { path: b"/f1".to_vec() });
    bob.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let mut probe = [0u8; 1];
    let silent = matches!(
        std::io::Read::read(&mut bob, &mut probe),
        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock
            || e.kind() == std::io::ErrorKind::TimedOut
    );
    assert!(silent, "a blocked lock must not produce a response yet");
    bob.set_read_timeout(None).unwrap();

    send(&mut alice, &Request::Unlock { path: b"/f1".to_vec() });
    expect_code(&mut alice, ResponseCode::Ok);
    // The hand-off finally answers Bob's lock request.
    expect_code(&mut bob, ResponseCode::Ok);
    send(&mut bob, &Request::Unlock { path: b"/f1".to_vec() });
    expect_code(&mut bob, ResponseCode::Ok);

    // Malformed input gets bad-request and the connection survives.
    alice.write_all(b"x").unwrap();
    expect_code(&mut alice, ResponseCode::BadRequest);

    send(&mut alice, &Request::ReadN { limit: 0 });
    expect_code(&mut alice, ResponseCode::Ok);
    let listing = response::read_file_list(&mut alice).unwrap();
    assert_eq!(listing, vec![(b"/f1".to_vec(), b"abcde".to_vec())]);

    // A write past the byte cap ships the FIFO victim back to the writer.
    send(
        &mut alice,
        &Request::Open {
            path: b"/f2".to_vec(),
            flags: create_lock,
        },
    );
    expect_code(&mut alice, ResponseCode::Ok);
    send(
        &mut alice,
        &Request::Write {
            path: b"/f2".to_vec(),
            content: b"01234567".to_vec(),
        },
    );
    expect_code(&mut alice, ResponseCode::Ok);
    let evicted = response::read_file_list(&mut alice).unwrap();
    assert_eq!(evicted, vec![(b"/f1".to_vec(), b"abcde".to_vec())]);

    // Bob queues for Alice's lock on /f2; Alice's disconnect grants it.
    send(
        &mut bob,
        &Request::Open {
            path: b"/f2".to_vec(),
            flags: OpenFlags::default(),
        },
    );
    expect_code(&mut bob, ResponseCode::Ok);
    send(&mut bob, &Request::Lock { path: b"/f2".to_vec() });

    thread::sleep(Duration::from_millis(200));
    drop(alice);
    expect_code(&mut bob, ResponseCode::Ok);

    drop(bob);
    thread::sleep(Duration::from_millis(300));
    unsafe {
        libc::raise(libc::SIGHUP);
    }

    let report = server.join().unwrap();
    assert_eq!(report.summary.files_at_exit, 1);
    assert_eq!(report.summary.remaining_paths, vec![b"/f2".to_vec()]);
    assert_eq!(report.summary.max_files_reached, 2);
    assert!(report.summary.evictions >= 1);
    assert_eq!(report.max_clients, 2);
    assert!(!socket.exists(), "socket file must be removed on clean exit");

    // The operation log is one valid JSON array covering the session.
    let text = std::fs::read_to_string(&log).unwrap();
    let records: serde_json::Value = serde_json::from_str(&text).unwrap();
    let records = records.as_array().unwrap();
    assert!(records.len() >= 10);

    let ops: Vec<&str> = records
        .iter()
        .map(|r| r["operationType"].as_str().unwrap())
        .collect();
    assert_eq!(ops.iter().filter(|&&op| op == "NEW_CLIENT").count(), 2);
    assert_eq!(ops.iter().filter(|&&op| op == "CLIENT_LEFT").count(), 2);
    assert!(ops.contains(&"WRITE"));
    assert!(ops.contains(&"READ_N"));

    let waits: Vec<_> = records
        .iter()
        .filter(|r| {
            r["outcome"]
                .as_str()
                .map(|o| o.starts_with("client put on wait"))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(waits.len(), 2, "both blocked locks must be logged as waits");

    let _ = std::fs::remove_file(&log);
}
