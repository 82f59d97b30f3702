use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use plugrpc_frame::{ControlFrame, FrameWriter};
use plugrpc_mux::{Broker, BrokerConfig, MuxError, Role};
use plugrpc_transport::IpcStream;

fn session_with(config: BrokerConfig) -> (Broker, Broker) {
    let (left, right) = IpcStream::pair().unwrap();
    let client = Broker::new(left, Role::Client, config.clone()).unwrap();
    let server = Broker::new(right, Role::Server, config).unwrap();
    client.spawn().unwrap();
    server.spawn().unwrap();
    (client, server)
}

fn session() -> (Broker, Broker) {
    session_with(BrokerConfig::default())
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn dial_and_accept_exchange_bytes() {
    let (client, server) = session();

    let acceptor = thread::spawn(move || {
        let mut stream = server.accept(0).unwrap();
        let got = stream.recv().unwrap().unwrap();
        stream.send(&got).unwrap();
        stream
    });

    let mut stream = client.dial(0).unwrap();
    stream.send(b"echo me").unwrap();
    assert_eq!(stream.recv().unwrap().unwrap(), "echo me");
    drop(acceptor.join().unwrap());
}

#[test]
fn open_is_queued_when_peer_dials_first() {
    let (client, server) = session();
    let id = client.next_id();

    let dialer = thread::spawn(move || client.dial(id));
    thread::sleep(Duration::from_millis(50));

    let mut accepted = server.accept(id).unwrap();
    let dialed = dialer.join().unwrap().unwrap();
    dialed.send(b"late accept").unwrap();
    assert_eq!(accepted.recv().unwrap().unwrap(), "late accept");
}

#[test]
fn dial_blocks_until_the_id_is_served() {
    let (client, server) = session();
    let id = server.next_id();

    let dialer = thread::spawn(move || {
        let started = Instant::now();
        let stream = client.dial(id).unwrap();
        (started.elapsed(), stream)
    });

    thread::sleep(Duration::from_millis(150));
    let _served = server.accept(id).unwrap();
    let (waited, _stream) = dialer.join().unwrap();
    assert!(waited >= Duration::from_millis(100));
}

#[test]
fn ids_from_both_sides_never_collide() {
    let (client, server) = session();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        assert!(seen.insert(client.next_id()));
        assert!(seen.insert(server.next_id()));
    }
    assert!(!seen.contains(&0));
}

fn payload_for(id: u32) -> Vec<u8> {
    format!("stream-{id}-").repeat(50).into_bytes()
}

#[test]
fn concurrent_streams_stay_separate() {
    let (client, server) = session();
    let ids: Vec<u32> = (0..8).map(|_| client.next_id()).collect();

    let echoes: Vec<_> = ids
        .iter()
        .map(|&id| {
            let server = server.clone();
            thread::spawn(move || {
                let mut stream = server.accept(id).unwrap();
                let mut got = vec![0u8; payload_for(id).len()];
                stream.read_exact(&mut got).unwrap();
                stream.send(&got).unwrap();
                assert_eq!(stream.recv().unwrap(), None);
            })
        })
        .collect();

    let senders: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let client = client.clone();
            thread::spawn(move || {
                let stream = client.dial(id).unwrap();
                let (mut reader, writer) = stream.split();
                let expected = payload_for(id);
                for chunk in expected.chunks(7) {
                    writer.send(chunk).unwrap();
                }
                let mut echoed = vec![0u8; expected.len()];
                reader.read_exact(&mut echoed).unwrap();
                assert_eq!(echoed, expected);

                let handle = writer.handle();
                drop(writer);
                assert!(handle.is_closed());
            })
        })
        .collect();

    for sender in senders {
        sender.join().unwrap();
    }
    for echo in echoes {
        echo.join().unwrap();
    }
    assert_eq!(client.live_streams(), 0);
    wait_until(|| server.live_streams() == 0);
}

#[test]
fn large_writes_are_chunked_and_reassembled() {
    let config = BrokerConfig {
        max_payload_size: 1000,
        ..BrokerConfig::default()
    };
    let (client, server) = session_with(config);

    let receiver = thread::spawn(move || {
        let mut stream = server.accept(0).unwrap();
        let mut got = Vec::new();
        stream.read_to_end(&mut got).unwrap();
        got
    });

    let payload: Vec<u8> = (0..25_000u32).map(|i| (i % 251) as u8).collect();
    let mut stream = client.dial(0).unwrap();
    stream.write_all(&payload).unwrap();
    drop(stream);

    assert_eq!(receiver.join().unwrap(), payload);
}

#[test]
fn closing_a_stream_ends_it_for_the_peer_and_frees_routes() {
    let (client, server) = session();
    let id = client.next_id();

    let acceptor = {
        let server = server.clone();
        thread::spawn(move || server.accept(id).unwrap())
    };
    let stream = client.dial(id).unwrap();
    let mut accepted = acceptor.join().unwrap();
    assert_eq!(client.live_streams(), 1);
    assert_eq!(server.live_streams(), 1);

    stream.close();
    assert_eq!(accepted.recv().unwrap(), None);
    assert_eq!(accepted.recv().unwrap(), None);
    assert!(matches!(
        accepted.send(b"too late"),
        Err(MuxError::StreamClosed { .. })
    ));
    assert!(matches!(
        stream.send(b"closed"),
        Err(MuxError::StreamClosed { .. })
    ));

    assert_eq!(client.live_streams(), 0);
    wait_until(|| server.live_streams() == 0);

    // A retired ID is not handed out again.
    assert!(matches!(
        client.dial(id),
        Err(MuxError::StreamClosed { .. })
    ));
}

#[test]
fn closing_the_session_unblocks_everything_once() {
    let (client, server) = session();
    let served_id = client.next_id();

    let acceptor = {
        let server = server.clone();
        thread::spawn(move || server.accept(served_id).unwrap())
    };
    let stream = client.dial(served_id).unwrap();
    let _peer = acceptor.join().unwrap();
    let (mut reader, writer) = stream.split();

    let blocked_read = thread::spawn(move || reader.recv());
    let blocked_dial = {
        let client = client.clone();
        let id = server.next_id();
        thread::spawn(move || client.dial(id))
    };
    let blocked_accept = {
        let client = client.clone();
        thread::spawn(move || client.accept_with_timeout(40, None))
    };

    thread::sleep(Duration::from_millis(50));
    client.close();
    client.close();

    assert!(matches!(
        blocked_read.join().unwrap(),
        Err(MuxError::ConnectionClosed)
    ));
    assert!(matches!(
        blocked_dial.join().unwrap(),
        Err(MuxError::ConnectionClosed)
    ));
    assert!(matches!(
        blocked_accept.join().unwrap(),
        Err(MuxError::ConnectionClosed)
    ));
    assert!(matches!(writer.send(b"x"), Err(MuxError::ConnectionClosed)));
    assert!(client.is_closed());
    assert_eq!(client.live_streams(), 0);

    // The peer sees the transport go away as well.
    wait_until(|| server.is_closed());
    assert!(matches!(server.dial(99), Err(MuxError::ConnectionClosed)));
}

#[test]
fn accept_times_out_and_refuses_late_dial() {
    let config = BrokerConfig {
        accept_timeout: Duration::from_millis(50),
        ..BrokerConfig::default()
    };
    let (client, server) = session_with(config);
    let id = server.next_id();

    let err = server.accept(id).unwrap_err();
    assert!(matches!(err, MuxError::Timeout(t) if t == Duration::from_millis(50)));

    let late = client.dial(id);
    assert!(matches!(late, Err(MuxError::StreamClosed { .. })));
    assert!(!server.is_closed());
}

#[test]
fn dial_timeout_is_honored() {
    let config = BrokerConfig {
        dial_timeout: Some(Duration::from_millis(50)),
        ..BrokerConfig::default()
    };
    let (client, server) = session_with(config);

    let err = client.dial(5).unwrap_err();
    assert!(matches!(err, MuxError::Timeout(_)));
    assert_eq!(client.live_streams(), 0);

    // Give the server's routing loop time to see the abandoning close.
    thread::sleep(Duration::from_millis(50));
    assert!(matches!(
        server.accept(5),
        Err(MuxError::StreamClosed { .. })
    ));
}

#[test]
fn cancel_accept_wakes_the_acceptor() {
    let (client, server) = session();
    let id = server.next_id();

    let acceptor = {
        let server = server.clone();
        thread::spawn(move || server.accept(id))
    };
    thread::sleep(Duration::from_millis(30));
    assert!(server.cancel_accept(id));
    assert!(matches!(
        acceptor.join().unwrap(),
        Err(MuxError::Cancelled)
    ));

    assert!(matches!(
        client.dial(id),
        Err(MuxError::StreamClosed { .. })
    ));
    assert!(!server.cancel_accept(id));
}

#[test]
fn duplicate_dial_is_rejected_locally() {
    let (client, server) = session();
    let acceptor = thread::spawn(move || server.accept(0).unwrap());
    let _stream = client.dial(0).unwrap();
    let _accepted = acceptor.join().unwrap();

    assert!(matches!(client.dial(0), Err(MuxError::DuplicateStream(0))));
}

#[test]
fn protocol_violation_tears_down_the_session() {
    let (left, right) = IpcStream::pair().unwrap();
    let broker = Broker::new(left, Role::Server, BrokerConfig::default()).unwrap();
    let routing = broker.spawn().unwrap();

    let mut raw = FrameWriter::new(right);
    raw.send_control(ControlFrame::open(1)).unwrap();
    raw.send(77, b"nobody opened this").unwrap();

    let outcome = routing.join().unwrap();
    assert!(matches!(outcome, Err(MuxError::Protocol(msg)) if msg.contains("77")));
    assert!(broker.is_closed());
    assert!(matches!(broker.accept(1), Err(MuxError::ConnectionClosed)));
}

#[test]
fn peer_eof_ends_routing_cleanly() {
    let (left, right) = IpcStream::pair().unwrap();
    let broker = Broker::new(left, Role::Client, BrokerConfig::default()).unwrap();
    let routing = broker.spawn().unwrap();

    drop(right);
    assert!(routing.join().unwrap().is_ok());
    assert!(broker.is_closed());

    assert!(matches!(broker.run(), Err(MuxError::AlreadyRunning)));
}
