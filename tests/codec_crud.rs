use bytes::Bytes;
use memwire::codec::KvCodec;
use memwire::payload::Payload;
use memwire::protocol::{
    RawResponse, RequestHeader, ServerFeature, HEADER_SIZE, OP_GET, STATUS_SUCCESS,
};
use memwire::request::{Operation, Request};
use memwire::response::{Response, ResponseStatus};

fn success(opaque: u32, cas: u64, extras: Bytes, value: Bytes) -> RawResponse {
    RawResponse {
        opcode: 0,
        status: STATUS_SUCCESS,
        opaque,
        cas,
        extras,
        key: Bytes::new(),
        value,
    }
}

#[test]
fn get_round_trip() {
    let mut codec = KvCodec::new("default", "server-a", true);

    // GET "foo" on partition 42, opaque 7
    let frame = codec.encode(Request::new(
        7,
        42,
        "default",
        Operation::Get {
            key: Bytes::from_static(b"foo"),
        },
    ));
    let header = RequestHeader::parse(&frame).expect("parse frame");
    assert_eq!(header.opcode, OP_GET);
    assert_eq!(header.key_len, 3);
    assert_eq!(header.extras_len, 0);
    assert_eq!(header.body_len, 3);
    assert_eq!(header.partition, 42);
    assert_eq!(header.opaque, 7);
    assert_eq!(&frame[HEADER_SIZE..], b"foo");

    let decoded = codec
        .decode(success(
            7,
            0x1234,
            Bytes::from_static(&[0, 0, 0, 2]),
            Bytes::from_static(b"bar"),
        ))
        .expect("decode")
        .expect("complete response");
    match decoded.response {
        Response::Get {
            common,
            flags,
            content,
        } => {
            assert_eq!(common.status, ResponseStatus::Success);
            assert_eq!(common.cas, 0x1234);
            assert_eq!(common.bucket, "default");
            assert_eq!(flags, 2);
            assert_eq!(&content[..], b"bar");
        }
        other => panic!("expected get response, got {other:?}"),
    }
    assert!(decoded.retry.is_none());
    assert_eq!(codec.pending(), 0);
}

#[test]
fn upsert_emits_mutation_token_when_negotiated() {
    let mut codec = KvCodec::new("default", "server-a", true);
    codec.apply_server_features(&[ServerFeature::MutationSeqno]);
    assert!(codec.seq_on_mutation());

    let frame = codec.encode(Request::new(
        1,
        0,
        "default",
        Operation::Upsert {
            key: Bytes::from_static(b"k"),
            flags: 1,
            expiry: 60,
            payload: Payload::new(Bytes::from_static(b"v")),
        },
    ));
    let header = RequestHeader::parse(&frame).expect("parse frame");
    assert_eq!(header.body_len, 10);
    assert_eq!(
        &frame[HEADER_SIZE..HEADER_SIZE + 8],
        &[0, 0, 0, 1, 0, 0, 0, 60]
    );

    let mut extras = Vec::new();
    extras.extend_from_slice(&0xAAAA_AAAA_AAAA_AAAAu64.to_be_bytes());
    extras.extend_from_slice(&0xBBBB_BBBB_BBBB_BBBBu64.to_be_bytes());
    let decoded = codec
        .decode(success(1, 9, Bytes::from(extras), Bytes::new()))
        .expect("decode")
        .expect("complete response");
    match decoded.response {
        Response::Store { token, .. } => {
            let token = token.expect("mutation token");
            assert_eq!(token.partition, 0);
            assert_eq!(token.partition_uuid, 0xAAAA_AAAA_AAAA_AAAA);
            assert_eq!(token.sequence, 0xBBBB_BBBB_BBBB_BBBB);
            assert_eq!(token.bucket, "default");
        }
        other => panic!("expected store response, got {other:?}"),
    }
}

#[test]
fn mutation_token_needs_feature_and_environment() {
    // Server advertises the feature but the environment says no.
    let mut codec = KvCodec::new("default", "server-a", false);
    codec.apply_server_features(&[ServerFeature::MutationSeqno]);
    assert!(!codec.seq_on_mutation());

    codec.encode(Request::new(
        1,
        0,
        "default",
        Operation::Remove {
            key: Bytes::from_static(b"k"),
        },
    ));
    let extras = Bytes::from(vec![0xAB; 16]);
    let decoded = codec
        .decode(success(1, 2, extras, Bytes::new()))
        .expect("decode")
        .expect("complete response");
    match decoded.response {
        Response::Remove { token, .. } => assert!(token.is_none()),
        other => panic!("expected remove response, got {other:?}"),
    }

    // Environment allows tokens but the server never advertised the feature.
    let mut codec = KvCodec::new("default", "server-a", true);
    codec.apply_server_features(&[ServerFeature::Xattr, ServerFeature::Snappy]);
    assert!(!codec.seq_on_mutation());
}

#[test]
fn counter_decode_reads_value() {
    let mut codec = KvCodec::new("default", "server-a", false);
    codec.encode(Request::new(
        3,
        1,
        "default",
        Operation::Counter {
            key: Bytes::from_static(b"n"),
            delta: -5,
            initial: 0,
            expiry: 0,
        },
    ));
    let decoded = codec
        .decode(success(
            3,
            0,
            Bytes::new(),
            Bytes::copy_from_slice(&41u64.to_be_bytes()),
        ))
        .expect("decode")
        .expect("complete response");
    match decoded.response {
        Response::Counter { value, .. } => assert_eq!(value, 41),
        other => panic!("expected counter response, got {other:?}"),
    }
}

#[test]
fn counter_failure_reports_zero() {
    let mut codec = KvCodec::new("default", "server-a", false);
    codec.encode(Request::new(
        4,
        1,
        "default",
        Operation::Counter {
            key: Bytes::from_static(b"n"),
            delta: 1,
            initial: 0,
            expiry: 0,
        },
    ));
    let raw = RawResponse {
        opcode: 0,
        status: 0x0086, // temporary failure
        opaque: 4,
        cas: 0,
        extras: Bytes::new(),
        key: Bytes::new(),
        value: Bytes::new(),
    };
    let decoded = codec.decode(raw).expect("decode").expect("complete");
    match decoded.response {
        Response::Counter { common, value, token } => {
            assert_eq!(common.status, ResponseStatus::TemporaryFailure);
            assert_eq!(value, 0);
            assert!(token.is_none());
        }
        other => panic!("expected counter response, got {other:?}"),
    }
}

#[test]
fn bucket_config_is_annotated_with_origin() {
    let mut codec = KvCodec::new("default", "node3.example.com", false);
    codec.encode(Request::new(8, -1, "default", Operation::GetBucketConfig));
    let decoded = codec
        .decode(success(
            8,
            0,
            Bytes::new(),
            Bytes::from_static(b"{\"rev\":42}"),
        ))
        .expect("decode")
        .expect("complete response");
    match decoded.response {
        Response::GetBucketConfig { config, origin, .. } => {
            assert_eq!(&config[..], b"{\"rev\":42}");
            assert_eq!(origin, "node3.example.com");
        }
        other => panic!("expected bucket config response, got {other:?}"),
    }
}

#[test]
fn responses_consume_requests_in_send_order() {
    let mut codec = KvCodec::new("default", "server-a", false);
    for opaque in 0..3u32 {
        codec.encode(Request::new(
            opaque,
            0,
            "default",
            Operation::Get {
                key: Bytes::from_static(b"k"),
            },
        ));
    }
    assert_eq!(codec.pending(), 3);
    for opaque in 0..3u32 {
        let decoded = codec
            .decode(success(opaque, 0, Bytes::new(), Bytes::new()))
            .expect("decode")
            .expect("complete response");
        assert!(matches!(decoded.response, Response::Get { .. }));
    }
    assert_eq!(codec.pending(), 0);
}
