use hotwire_proto::{
    decode_frame, encode_frame, encode_packet, read_packet, ClearResultRequest, InvocationResult,
    InvokeResponse, Packet, PacketKind, ProtocolError, Value, DEFAULT_MAX_FRAME_BYTES,
    PROTOCOL_VERSION,
};

fn sample() -> Packet {
    Packet::InvokeResponse(InvokeResponse {
        offset: "offset-1".into(),
        result: InvocationResult::Returned {
            value: Value::Int(42),
            rendered: "42".into(),
        },
    })
}

#[test]
fn decode_frame_rejects_truncated_payload() {
    let frame = encode_packet(&sample()).unwrap();
    let truncated = &frame[..frame.len() - 1];
    assert!(matches!(
        decode_frame(truncated, DEFAULT_MAX_FRAME_BYTES),
        Err(ProtocolError::Truncated)
    ));
}

#[test]
fn decode_frame_rejects_trailing_bytes() {
    let mut frame = encode_packet(&sample()).unwrap();
    frame.push(0);
    assert!(matches!(
        decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES),
        Err(ProtocolError::Malformed { .. })
    ));
}

#[test]
fn decode_frame_rejects_trailing_bytes_inside_payload() {
    let frame = encode_packet(&sample()).unwrap();
    let mut payload = frame[8..].to_vec();
    payload.push(0);
    let padded = encode_frame(PROTOCOL_VERSION, PacketKind::InvokeResponse.as_u16(), &payload)
        .unwrap();
    let err = decode_frame(&padded, DEFAULT_MAX_FRAME_BYTES).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Malformed {
            kind: Some(PacketKind::InvokeResponse),
            ..
        }
    ));
    assert!(!err.is_fatal());
}

#[test]
fn decode_frame_rejects_invalid_payload() {
    let frame = encode_frame(PROTOCOL_VERSION, PacketKind::CompileRequest.as_u16(), &[0xff])
        .unwrap();
    assert!(matches!(
        decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES),
        Err(ProtocolError::Malformed { .. })
    ));
}

#[test]
fn decode_frame_rejects_oversized_len_prefix() {
    let max = 1024;
    let bytes = (max as u32 + 1).to_le_bytes();
    let err = decode_frame(&bytes, max).unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge { len: 1025, max: 1024 }));
    assert!(err.is_fatal());
}

#[test]
fn oversized_frame_is_refused_before_reading_the_body() {
    // Only the prefix is present: a reader that allocated first would block or fail differently.
    let mut stream = std::io::Cursor::new(u32::MAX.to_le_bytes().to_vec());
    assert!(matches!(
        read_packet(&mut stream, DEFAULT_MAX_FRAME_BYTES),
        Err(ProtocolError::FrameTooLarge { .. })
    ));
}

#[test]
fn every_packet_kind_survives_the_wire() {
    use hotwire_proto::*;

    let failure = Failure::new("NotLoaded", "class com.example.A is not loaded");
    let packets = vec![
        Packet::CompileRequest(CompileRequest {
            units: vec![SourceUnit {
                class_name: "com.example.A".into(),
                source: "package com.example; class A {}".into(),
            }],
        }),
        Packet::CompileResponse(CompileResponse {
            outcome: CompileOutcome::Failed {
                failure: failure.clone(),
                diagnostics: vec![Diagnostic {
                    unit: "com.example.A".into(),
                    line: Some(1),
                    column: None,
                    severity: Severity::Error,
                    message: "boom".into(),
                }],
            },
        }),
        Packet::RedefineRequest(RedefineRequest {
            class_name: "com.example.A".into(),
            bytecode: vec![0xca, 0xfe, 0xba, 0xbe],
            directives: vec![InstrumentationDirective::AddAccessor {
                kind: AccessorKind::FieldRead,
                name: "secret".into(),
                descriptor: None,
            }],
        }),
        Packet::RedefineResponse(RedefineResponse {
            class_name: "com.example.A".into(),
            result: Err(failure.clone()),
        }),
        Packet::InvokeRequest(InvokeRequest {
            target: TargetDescriptor {
                class_name: "com.example.A".into(),
                method: "run".into(),
                descriptor: Some("(I)V".into()),
                args: vec!["7".into()],
            },
            offset: "o".into(),
        }),
        sample(),
        Packet::ClearResultRequest(ClearResultRequest {
            offsets: vec!["o".into(), "p".into()],
        }),
        Packet::ClearResultResponse(ClearResultResponse {
            removed: vec!["p".into()],
        }),
        Packet::GetResultRequest(GetResultRequest { offset: "o".into() }),
        Packet::GetResultResponse(GetResultResponse {
            offset: "o".into(),
            result: Some(InvocationResult::Failed(failure.clone())),
        }),
        Packet::HotSwapRequest(HotSwapRequest { units: vec![] }),
        Packet::HotSwapResponse(HotSwapResponse {
            outcome: HotSwapOutcome::Applied(vec![HotSwapClassResult {
                class_name: "com.example.A".into(),
                status: HotSwapStatus::Defined,
            }]),
        }),
        Packet::error(failure),
    ];

    let mut stream = Vec::new();
    for packet in &packets {
        hotwire_proto::write_packet(&mut stream, packet).unwrap();
    }
    let mut reader = std::io::Cursor::new(stream);
    for packet in &packets {
        assert_eq!(&read_packet(&mut reader, DEFAULT_MAX_FRAME_BYTES).unwrap(), packet);
    }
    assert!(matches!(
        read_packet(&mut reader, DEFAULT_MAX_FRAME_BYTES),
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[test]
fn clear_request_payload_is_a_list_of_offsets() {
    let payload = bincode::serialize(&vec!["a".to_string(), "b".to_string()]).unwrap();
    let frame = encode_frame(
        PROTOCOL_VERSION,
        PacketKind::ClearResultRequest as u16,
        &payload,
    )
    .unwrap();
    assert_eq!(
        decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).unwrap(),
        Packet::ClearResultRequest(ClearResultRequest {
            offsets: vec!["a".into(), "b".into()],
        })
    );
}
