//! Reading, writing, peeking and flushing on established connections.

use std::io::{BufRead, Read, Write};
use std::time::Duration;

use sslclient::{ClientConfig, ConnectionState, Error};
use sslclient_test::record;

use super::{Fixture, HOST};

#[test]
fn writes_are_batched_until_flush() {
    let mut f = Fixture::new();
    f.connect();

    assert_eq!(f.conn.write(b"hello ").unwrap(), 6);
    assert_eq!(f.conn.write(b"world").unwrap(), 5);
    assert!(f.peer().received.is_empty());

    f.conn.flush().unwrap();
    assert_eq!(f.peer().received, b"hello world");

    let mut buf = [0u8; 32];
    let n = f.conn.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello world");
}

#[test]
fn large_writes_span_records() {
    let mut f = Fixture::new();
    f.connect();

    let data: Vec<u8> = (0..40_000u32)
        .map(|i| (i % 251) as u8)
        .collect();
    assert_eq!(f.conn.write(&data).unwrap(), data.len());
    // two full records went out without a flush
    assert_eq!(f.peer().received.len(), 32768);

    f.conn.flush().unwrap();
    assert_eq!(f.peer().received, data);
}

#[test]
fn short_transport_writes_are_completed() {
    let mut f = Fixture::new();
    f.peer().chunk = 7;
    f.connect();

    f.conn.write_all(b"through a narrow pipe").unwrap();
    f.conn.flush().unwrap();
    assert_eq!(f.peer().received, b"through a narrow pipe");

    let mut echoed = [0u8; 21];
    f.conn.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"through a narrow pipe");
}

#[test]
fn peek_does_not_consume() {
    let mut f = Fixture::with(|b| b.greeting = b"220 ready\r\n".to_vec());
    f.connect();

    assert_eq!(f.conn.available(), 11);
    assert_eq!(f.conn.peek_available(), 11);
    assert_eq!(f.conn.peek(), Some(b'2'));
    assert_eq!(f.conn.peek_buffer(), b"220 ready\r\n");

    let mut buf = [0u8; 3];
    assert_eq!(f.conn.peek_bytes(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"220");
    assert_eq!(f.conn.available(), 11);

    assert_eq!(f.conn.peek_consume(4), 4);
    assert_eq!(f.conn.peek_buffer(), b"ready\r\n");
    assert_eq!(f.conn.peek_consume(100), 7);
    assert_eq!(f.conn.peek_consume(1), 0);
    assert_eq!(f.conn.peek(), None);
}

#[test]
fn buf_read_lines() {
    let mut f = Fixture::with(|b| b.greeting = b"first\nsecond\n".to_vec());
    f.connect();

    let mut line = String::new();
    f.conn.read_line(&mut line).unwrap();
    assert_eq!(line, "first\n");
    line.clear();
    f.conn.read_line(&mut line).unwrap();
    assert_eq!(line, "second\n");
}

#[test]
fn read_times_out_without_failing_the_connection() {
    let mut f = Fixture::with(|b| b.echo = false);
    f.connect();
    let before = f.clock.elapsed();

    let mut buf = [0u8; 8];
    assert_eq!(f.conn.read(&mut buf), Err(Error::IoTimeout));
    assert!(f.clock.elapsed() - before > ClientConfig::DEFAULT_IO_TIMEOUT);
    assert!(f.clock.elapsed() - before < ClientConfig::DEFAULT_IO_TIMEOUT * 2);
    assert_eq!(f.conn.state(), &ConnectionState::Established);

    f.conn.set_timeout(Duration::from_secs(2));
    let before = f.clock.elapsed();
    assert_eq!(f.conn.peek_bytes(&mut buf), Err(Error::IoTimeout));
    assert!(f.clock.elapsed() - before < Duration::from_secs(3));
}

#[test]
fn peer_close_reads_as_end_of_stream() {
    let mut f = Fixture::with(|b| b.close_after_reply = true);
    f.connect();
    f.conn.write_all(b"QUIT\r\n").unwrap();
    f.conn.flush().unwrap();

    let mut got = Vec::new();
    f.conn.read_to_end(&mut got).unwrap();
    assert_eq!(got, b"QUIT\r\n");
    assert_eq!(f.conn.state(), &ConnectionState::Idle);
    assert!(!f.conn.connected());
    assert_eq!(f.provider.live(), 0);
    assert_eq!(f.conn.last_ssl_error(), None);
}

#[test]
fn data_outlives_the_transport_until_read() {
    let mut f = Fixture::with(|b| b.close_after_reply = true);
    f.connect();
    f.conn.write_all(b"bye").unwrap();
    f.conn.flush().unwrap();

    assert_eq!(f.conn.available(), 3);
    assert!(!f.peer().open);
    assert!(f.conn.connected());

    let mut buf = [0u8; 3];
    f.conn.read_exact(&mut buf).unwrap();
    assert!(!f.conn.connected());
}

#[test]
fn close_notify_releases_the_connection() {
    let mut f = Fixture::new();
    f.connect();
    f.peer().push(&record(0x15, &[1, 0]));

    assert_eq!(f.conn.available(), 0);
    assert_eq!(f.conn.state(), &ConnectionState::Idle);
    assert!(!f.conn.connected());
    assert_eq!(f.provider.live(), 0);
    assert_eq!(f.peer().stops, 1);

    assert_eq!(f.conn.write(b"x"), Err(Error::NotConnected));
    assert_eq!(f.conn.flush(), Err(Error::NotConnected));
    assert_eq!(f.conn.last_ssl_error(), None);
}

#[test]
fn plain_connections_read_and_peek_raw_bytes() {
    let mut f = Fixture::new();
    f.conn.connect(HOST, 80).unwrap();
    f.peer().push(b"HTTP/1.0 200 OK\r\n");

    assert_eq!(f.conn.available(), 17);
    assert_eq!(f.conn.peek(), Some(b'H'));

    let mut line = String::new();
    f.conn.read_line(&mut line).unwrap();
    assert_eq!(line, "HTTP/1.0 200 OK\r\n");
    assert_eq!(f.conn.available(), 0);

    f.conn.write_all(b"ok").unwrap();
    f.conn.flush().unwrap();
    assert_eq!(f.peer().written, b"ok");
}

#[test]
fn plain_read_times_out() {
    let mut f = Fixture::new();
    f.conn.connect(HOST, 80).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(f.conn.read(&mut buf), Err(Error::IoTimeout));
    assert_eq!(f.conn.state(), &ConnectionState::Established);
}

#[test]
fn stalled_plain_write_fails() {
    let mut f = Fixture::new();
    f.conn.connect(HOST, 80).unwrap();
    f.peer().stall_writes = true;

    assert_eq!(f.conn.write(b"data"), Err(Error::WriteFailed));
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::WriteFailed)
    );
}

#[test]
fn stalled_tls_flush_fails_after_the_timeout() {
    let mut f = Fixture::new();
    f.connect();
    f.peer().stall_writes = true;

    f.conn.write(b"data").unwrap();
    let before = f.clock.elapsed();
    assert_eq!(f.conn.flush(), Err(Error::WriteFailed));
    assert!(f.clock.elapsed() - before > ClientConfig::DEFAULT_IO_TIMEOUT);
    assert_eq!(
        f.conn.state(),
        &ConnectionState::Failed(Error::WriteFailed)
    );
    assert_eq!(f.provider.live(), 0);
}

#[test]
fn io_needs_a_connection() {
    let mut f = Fixture::new();
    let mut buf = [0u8; 4];

    assert_eq!(f.conn.read(&mut buf), Ok(0));
    assert_eq!(f.conn.peek_bytes(&mut buf), Ok(0));
    assert_eq!(f.conn.write(b"x"), Err(Error::NotConnected));
    assert_eq!(f.conn.flush(), Err(Error::NotConnected));
    assert_eq!(f.conn.available(), 0);
    assert_eq!(f.conn.available_for_write(), 0);
    assert_eq!(f.conn.peek(), None);
}

#[test]
fn available_for_write_reports_record_space() {
    let mut f = Fixture::new();
    f.conn.set_buffer_sizes(16384, 1024);
    f.connect();

    assert_eq!(f.conn.available_for_write(), 1024);
    f.conn.write(b"0123456789").unwrap();
    assert_eq!(f.conn.available_for_write(), 1014);
}

#[test]
fn empty_buffers_are_no_ops() {
    let mut f = Fixture::new();
    f.connect();

    assert_eq!(f.conn.read(&mut []), Ok(0));
    assert_eq!(f.conn.peek_bytes(&mut []), Ok(0));
    assert_eq!(f.conn.write(&[]), Ok(0));
    assert!(f.peer().received.is_empty());
}
