use std::borrow::Cow;

use comms::msg::{Command, Msg, OpHeader, OpKind, ReduceOp};
use tokio::io::{self, AsyncWriteExt};

const BUF_SIZE: usize = 1024;

#[tokio::test]
async fn control_roundtrip_over_duplex() {
    let (one, two) = io::duplex(BUF_SIZE);
    let (one_read, one_write) = io::split(one);
    let (_, mut tx) = comms::channel(one_read, one_write);
    let (two_read, two_write) = io::split(two);
    let (mut rx, _) = comms::channel(two_read, two_write);

    let header = OpHeader {
        seq: 3,
        kind: OpKind::AllReduce {
            op: ReduceOp::Average,
            len: 2,
        },
    };
    tx.send(&Msg::Control(Command::Op(header.clone())))
        .await
        .unwrap();

    let mut buf: Vec<u32> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(Command::Op(got)) => assert_eq!(got, header),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn tensor_payload_is_received_aligned() {
    let (one, two) = io::duplex(BUF_SIZE);
    let (one_read, one_write) = io::split(one);
    let (_, mut tx) = comms::channel(one_read, one_write);
    let (two_read, two_write) = io::split(two);
    let (mut rx, _) = comms::channel(two_read, two_write);

    let values = [0.5f32, -1.25, 3.0];
    tx.send(&Msg::Data(&values)).await.unwrap();
    tx.send(&Msg::Err(Cow::Borrowed("boom"))).await.unwrap();

    let mut buf: Vec<f32> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(got) => assert_eq!(got, values),
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Err(detail) => assert_eq!(detail, "boom"),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn closed_stream_is_an_error() {
    let (one, two) = io::duplex(BUF_SIZE);
    drop(one);

    let (two_read, two_write) = io::split(two);
    let (mut rx, _) = comms::channel(two_read, two_write);

    let mut buf: Vec<u32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn truncated_frame_is_invalid_data() {
    let (mut one, two) = io::duplex(BUF_SIZE);
    one.write_all(&64u64.to_be_bytes()).await.unwrap();
    one.write_all(&[0; 10]).await.unwrap();
    drop(one);

    let (two_read, two_write) = io::split(two);
    let (mut rx, _) = comms::channel(two_read, two_write);

    let mut buf: Vec<u32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected() {
    let (mut one, two) = io::duplex(BUF_SIZE);
    let len = comms::MAX_FRAME_LEN as u64 + 1;
    one.write_all(&len.to_be_bytes()).await.unwrap();

    let (two_read, two_write) = io::split(two);
    let (mut rx, _) = comms::channel(two_read, two_write);

    let mut buf: Vec<u32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
