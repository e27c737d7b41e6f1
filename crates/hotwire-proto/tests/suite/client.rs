use hotwire_proto::{
    read_packet_async, write_packet_async, Client, ClientError, ClearResultResponse, Failure,
    Packet, PacketKind, DEFAULT_MAX_FRAME_BYTES,
};

#[tokio::test]
async fn clear_results_round_trips_through_a_peer() {
    let (client_end, mut agent_end) = tokio::io::duplex(4096);
    let agent = tokio::spawn(async move {
        let request = read_packet_async(&mut agent_end, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        let Packet::ClearResultRequest(req) = request else {
            panic!("unexpected request {request:?}");
        };
        assert_eq!(req.offsets, vec!["abc".to_string(), "gone".to_string()]);
        let reply = Packet::ClearResultResponse(ClearResultResponse {
            removed: vec!["abc".into()],
        });
        write_packet_async(&mut agent_end, &reply).await.unwrap();
    });

    let mut client = Client::new(client_end);
    let resp = client.clear_results(["abc", "gone"]).await.unwrap();
    assert_eq!(resp.removed, vec!["abc".to_string()]);
    agent.await.unwrap();
}

#[tokio::test]
async fn error_response_and_wrong_kind_surface_as_client_errors() {
    let (client_end, mut agent_end) = tokio::io::duplex(4096);
    let agent = tokio::spawn(async move {
        read_packet_async(&mut agent_end, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        write_packet_async(&mut agent_end, &Packet::error(Failure::new("Busy", "try later")))
            .await
            .unwrap();

        read_packet_async(&mut agent_end, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        let wrong = Packet::ClearResultResponse(ClearResultResponse {
            removed: Vec::new(),
        });
        write_packet_async(&mut agent_end, &wrong).await.unwrap();
    });

    let mut client = Client::new(client_end);
    match client.get_result("x").await {
        Err(ClientError::Remote(failure)) => assert_eq!(failure.kind, "Busy"),
        other => panic!("expected remote error, got {other:?}"),
    }
    match client.get_result("x").await {
        Err(ClientError::UnexpectedResponse { request, actual }) => {
            assert_eq!(request, PacketKind::GetResultRequest);
            assert_eq!(actual, PacketKind::ClearResultResponse);
        }
        other => panic!("expected unexpected-response error, got {other:?}"),
    }
    agent.await.unwrap();
}
