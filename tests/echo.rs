use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use framed_rpc::processor::EchoProcessor;
use framed_rpc::{Server, ServerConfig};

fn spawn_server() -> (Arc<Server<EchoProcessor>>, std::net::SocketAddr) {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        num_workers: 4,
        ..ServerConfig::default()
    };
    let server = Arc::new(Server::new(config, EchoProcessor));
    let running = server.clone();
    std::thread::spawn(move || running.serve());

    let addr = loop {
        if let Some(addr) = server.local_addr() {
            break addr;
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    (server, addr)
}

fn send_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(&(payload.len() as u32).to_be_bytes()).unwrap();
    stream.write_all(payload).unwrap();
}

fn read_frame_reply(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn single_frame_round_trips() {
    let (server, addr) = spawn_server();
    let mut client = TcpStream::connect(addr).unwrap();

    send_frame(&mut client, b"ping");
    let reply = read_frame_reply(&mut client, 4);
    assert_eq!(&reply, b"ping");

    server.shutdown(Duration::from_secs(2), true);
}

#[test]
fn pipelined_frames_each_get_their_own_reply() {
    let (server, addr) = spawn_server();
    let mut client = TcpStream::connect(addr).unwrap();

    send_frame(&mut client, b"one");
    send_frame(&mut client, b"two");
    send_frame(&mut client, b"three");

    let mut reply = vec![0u8; 3 + 3 + 5];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"onetwothree");

    server.shutdown(Duration::from_secs(2), true);
}

#[test]
fn many_concurrent_connections_each_echo_correctly() {
    let (server, addr) = spawn_server();

    let clients: Vec<_> = (0..16)
        .map(|i| {
            std::thread::spawn(move || {
                let mut client = TcpStream::connect(addr).unwrap();
                let payload = format!("client-{i}");
                send_frame(&mut client, payload.as_bytes());
                let reply = read_frame_reply(&mut client, payload.len());
                assert_eq!(reply, payload.as_bytes());
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    server.shutdown(Duration::from_secs(2), true);
}

#[test]
fn partial_frame_then_close_drops_the_connection_without_dispatch() {
    let (server, addr) = spawn_server();
    let mut client = TcpStream::connect(addr).unwrap();

    // Declare a 10-byte payload but only send 3 bytes, then close.
    client.write_all(&10u32.to_be_bytes()).unwrap();
    client.write_all(b"abc").unwrap();
    drop(client);

    // No reply was ever owed; just confirm the server keeps running and
    // accepts further connections normally.
    let mut other = TcpStream::connect(addr).unwrap();
    send_frame(&mut other, b"ok");
    let reply = read_frame_reply(&mut other, 2);
    assert_eq!(&reply, b"ok");

    server.shutdown(Duration::from_secs(2), true);
}

#[test]
fn zero_length_frame_gets_a_zero_length_reply() {
    let (server, addr) = spawn_server();
    let mut client = TcpStream::connect(addr).unwrap();

    send_frame(&mut client, b"");
    send_frame(&mut client, b"after");
    let reply = read_frame_reply(&mut client, 5);
    assert_eq!(&reply, b"after");

    server.shutdown(Duration::from_secs(2), true);
}

#[test]
fn shutdown_with_drain_lets_in_flight_work_finish() {
    let (server, addr) = spawn_server();
    let mut client = TcpStream::connect(addr).unwrap();
    send_frame(&mut client, b"drain-me");

    let reply = read_frame_reply(&mut client, 8);
    assert_eq!(&reply, b"drain-me");

    let start = std::time::Instant::now();
    server.shutdown(Duration::from_secs(2), true);
    assert!(start.elapsed() < Duration::from_secs(2));
}
