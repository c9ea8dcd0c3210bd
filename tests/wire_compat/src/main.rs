fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use ota_protocol::messages::{
        ChunkAck, NotifyRequest, PackageListResponse, StatusEvent, StatusResponse,
        TransferAborted, TransferChunkRequest,
    };
    use ota_protocol::{ErrorKind, Message, MessageType, Request, TransferStatus};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let text = read_fixture(name);
        let fixture: serde_json::Value = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"));
        let parsed: T = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Envelopes ---

    #[test]
    fn fixture_start_transfer_envelope() {
        let msg = roundtrip_test::<Message>("start_transfer_envelope.json");
        assert_eq!(msg.msg_type, MessageType::StartTransfer);

        match Request::from_message(&msg).unwrap() {
            Request::Start(req) => {
                assert_eq!(req.transfer_id.as_str(), "t-1");
                assert_eq!(req.expected_size, 3);
                assert_eq!(req.checksum.as_deref().map(str::len), Some(64));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn fixture_error_envelope() {
        let msg = roundtrip_test::<Message>("error_envelope.json");
        assert!(msg.is_error());
        let err = msg.error.unwrap();
        assert_eq!(err.kind, Some(ErrorKind::UnknownTransfer));
        assert_eq!(err.code, ErrorKind::UnknownTransfer.code());
    }

    #[test]
    fn fixture_legacy_error_envelope() {
        let msg = roundtrip_test::<Message>("legacy_error_envelope.json");
        let err = msg.error.unwrap();
        assert_eq!(err.kind, None);
        assert_eq!(err.code, 500);
    }

    #[test]
    fn unknown_message_type_is_tolerated() {
        let msg: Message =
            serde_json::from_str(r#"{"id":"x","type":"reboot_device","payload":{}}"#).unwrap();
        assert_eq!(msg.msg_type, MessageType::Unknown);
        assert!(Request::from_message(&msg).is_err());
    }

    // --- Request payloads ---

    #[test]
    fn fixture_transfer_chunk_request() {
        let req = roundtrip_test::<TransferChunkRequest>("transfer_chunk_request.json");
        assert_eq!(req.data, b"abc");
    }

    #[test]
    fn fixture_notify_request() {
        let req = roundtrip_test::<NotifyRequest>("notify_request.json");
        assert_eq!(req.transfer_id.unwrap().as_str(), "t-1");
    }

    // --- Response payloads ---

    #[test]
    fn fixture_chunk_ack() {
        let ack = roundtrip_test::<ChunkAck>("chunk_ack.json");
        assert_eq!(ack.received_bytes, ack.expected_size);
    }

    #[test]
    fn fixture_transfer_aborted() {
        let aborted = roundtrip_test::<TransferAborted>("transfer_aborted.json");
        assert!(aborted.already_aborted);
    }

    #[test]
    fn fixture_status_response() {
        let status = roundtrip_test::<StatusResponse>("status_response.json");
        assert_eq!(status.transfers[0].status, TransferStatus::InProgress);
    }

    #[test]
    fn fixture_package_list_response() {
        let list = roundtrip_test::<PackageListResponse>("package_list_response.json");
        assert_eq!(list.packages.len(), 1);
        assert_eq!(list.packages[0].size, 3);
    }

    // --- Events ---

    #[test]
    fn fixture_status_event() {
        let event = roundtrip_test::<StatusEvent>("status_event.json");
        assert_eq!(event.status, TransferStatus::Aborted);
        assert_eq!(event.reason, "idle timeout");
    }
}
