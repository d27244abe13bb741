//! Integration tests for the genltest service over its Unix sockets.
//!
//! These tests start a full [`ServiceHost`] on temporary socket paths and
//! talk to it with raw frames, exactly as a client process would.

use std::path::Path;
use std::time::Duration;

use genl_core::family::ctrl::{getfamily_request, FamilyInfo};
use genl_core::family::genltest::{
    echo_policy, Attr, Command, FAMILY_NAME, FAMILY_VERSION, GROUP_NAME, MSG_MAX_LEN, REPLY_TEXT,
};
use genl_core::protocol::control::{membership_frame, ENOENT};
use genl_core::protocol::envelope::{flags, TRANSPORT_HEADER_SIZE};
use genl_core::protocol::{parse_control, ControlMessage};
use genl_core::{EnvelopeBuilder, ParsedEnvelope, TransportHeader};
use genl_service::infrastructure::config::ServiceConfig;
use genl_service::infrastructure::host::ServiceHost;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

async fn start_service(dir: &Path) -> ServiceHost {
    ServiceHost::start(ServiceConfig {
        socket_path: dir.join("service.sock"),
        trigger_path: dir.join("ping.sock"),
        ..ServiceConfig::default()
    })
    .await
    .expect("service should start")
}

async fn read_frame(stream: &mut UnixStream) -> Vec<u8> {
    tokio::time::timeout(READ_TIMEOUT, async {
        let mut header = [0u8; TRANSPORT_HEADER_SIZE];
        stream.read_exact(&mut header).await.unwrap();
        let len = TransportHeader::parse(&header).unwrap().len as usize;
        let mut frame = header.to_vec();
        frame.resize(len, 0);
        stream.read_exact(&mut frame[TRANSPORT_HEADER_SIZE..]).await.unwrap();
        frame
    })
    .await
    .expect("frame should arrive")
}

async fn resolve(stream: &mut UnixStream, name: &str) -> FamilyInfo {
    let request = getfamily_request(name, 1).unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    FamilyInfo::decode(&read_frame(stream).await).unwrap()
}

fn echo_request(family_id: u16, seq: u32, msg: Option<&str>) -> Vec<u8> {
    let mut builder = EnvelopeBuilder::begin(
        family_id,
        FAMILY_VERSION,
        Command::Echo.id(),
        seq,
        0,
        flags::REQUEST,
    )
    .unwrap();
    if let Some(text) = msg {
        builder.put_string(Attr::Msg.id(), text).unwrap();
    }
    builder.finalize().into_bytes()
}

/// Returns the control frame's header and its errno (0 for an ACK).
fn control_errno(frame: &[u8]) -> (TransportHeader, Option<i32>) {
    let (header, message) = parse_control(frame).unwrap();
    let errno = match message {
        ControlMessage::Ack { .. } => Some(0),
        ControlMessage::Error { errno, .. } => Some(errno),
        _ => None,
    };
    (header, errno)
}

fn msg_of(frame: &[u8], family_id: u16) -> String {
    ParsedEnvelope::parse(frame, Some(family_id))
        .unwrap()
        .attributes(&echo_policy())
        .unwrap()
        .get_str(Attr::Msg.id())
        .unwrap()
        .to_string()
}

async fn write_trigger(path: &Path, bytes: &[u8]) {
    let mut stream = UnixStream::connect(path).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_family_resolves_with_its_group() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let host = start_service(dir.path()).await;
    let mut stream = UnixStream::connect(&host.config().socket_path).await.unwrap();

    // Act
    let info = resolve(&mut stream, FAMILY_NAME).await;

    // Assert
    assert_eq!(info.name, FAMILY_NAME);
    assert_eq!(info.version, u32::from(FAMILY_VERSION));
    assert!(info.group_id(GROUP_NAME).is_some());
    host.shutdown().await;
}

#[tokio::test]
async fn test_unknown_family_is_enoent() {
    let dir = tempfile::tempdir().unwrap();
    let host = start_service(dir.path()).await;
    let mut stream = UnixStream::connect(&host.config().socket_path).await.unwrap();

    let request = getfamily_request("nosuchfamily", 4).unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let (header, errno) = control_errno(&read_frame(&mut stream).await);

    assert_eq!(header.seq, 4);
    assert_eq!(errno, Some(ENOENT));
    host.shutdown().await;
}

#[tokio::test]
async fn test_echo_request_gets_greeting_with_same_seq() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let host = start_service(dir.path()).await;
    let mut stream = UnixStream::connect(&host.config().socket_path).await.unwrap();
    let info = resolve(&mut stream, FAMILY_NAME).await;

    // Act
    stream
        .write_all(&echo_request(info.id, 42, Some("ping")))
        .await
        .unwrap();
    let reply = read_frame(&mut stream).await;

    // Assert
    let header = TransportHeader::parse(&reply).unwrap();
    assert_eq!(header.msg_type, info.id);
    assert_eq!(header.seq, 42);
    assert_ne!(header.port, 0);
    assert_eq!(msg_of(&reply, info.id), REPLY_TEXT);
    host.shutdown().await;
}

#[tokio::test]
async fn test_unknown_command_is_dropped_and_service_keeps_answering() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let host = start_service(dir.path()).await;
    let mut stream = UnixStream::connect(&host.config().socket_path).await.unwrap();
    let info = resolve(&mut stream, FAMILY_NAME).await;
    let bogus = EnvelopeBuilder::begin(info.id, FAMILY_VERSION, 9, 1, 0, flags::REQUEST)
        .unwrap()
        .finalize();

    // Act
    stream.write_all(bogus.as_bytes()).await.unwrap();
    stream.write_all(&echo_request(info.id, 2, None)).await.unwrap();
    let reply = read_frame(&mut stream).await;

    // Assert – the first frame back answers the second request
    assert_eq!(TransportHeader::parse(&reply).unwrap().seq, 2);
    assert_eq!(msg_of(&reply, info.id), REPLY_TEXT);
    host.shutdown().await;
}

#[tokio::test]
async fn test_trigger_write_reaches_group_member_truncated_to_cap() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let host = start_service(dir.path()).await;
    let mut stream = UnixStream::connect(&host.config().socket_path).await.unwrap();
    let info = resolve(&mut stream, FAMILY_NAME).await;
    let group = info.group_id(GROUP_NAME).unwrap();
    stream
        .write_all(membership_frame(true, group, 2).as_bytes())
        .await
        .unwrap();
    let (_, errno) = control_errno(&read_frame(&mut stream).await);
    assert_eq!(errno, Some(0));

    // Act
    write_trigger(&host.config().trigger_path, b"hello").await;
    let first = read_frame(&mut stream).await;
    write_trigger(&host.config().trigger_path, &vec![b'a'; 2000]).await;
    let second = read_frame(&mut stream).await;

    // Assert
    assert_eq!(msg_of(&first, info.id), "hello");
    assert_eq!(TransportHeader::parse(&first).unwrap().seq, 0);
    assert_eq!(msg_of(&second, info.id), "a".repeat(MSG_MAX_LEN));
    host.shutdown().await;
}

#[tokio::test]
async fn test_trigger_without_members_returns_accepted_count() {
    let dir = tempfile::tempdir().unwrap();
    let host = start_service(dir.path()).await;

    let accepted = host.trigger().store(b"nobody home").await;

    assert_eq!(accepted, 11);
    host.shutdown().await;
}
