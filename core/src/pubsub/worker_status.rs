// Worker status aggregation
//
// Each well-formed status report is appended to a bounded history and
// re-emitted once, JSON encoded, on the output channel.

use super::{DecodeError, PubSubMessage, SubscriptionHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// A worker's status report as carried on the worker-status topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    /// Opaque payload, base64 in JSON
    #[serde(rename = "Data", with = "base64_bytes", default)]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => general_purpose::STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

pub struct WorkerStatusHandler {
    history: Mutex<VecDeque<WorkerStatus>>,
    capacity: usize,
    output: mpsc::Sender<Vec<u8>>,
}

impl WorkerStatusHandler {
    pub fn new(capacity: usize, output: mpsc::Sender<Vec<u8>>) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
            capacity,
            output,
        }
    }

    /// Handler plus the receiving end of its output channel
    pub fn channel(capacity: usize, buffer: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(capacity, tx), rx)
    }

    pub fn decode(data: &[u8]) -> Result<WorkerStatus, DecodeError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode, record and forward one report. Malformed payloads are
    /// dropped without touching the history or the output channel.
    pub async fn process(&self, data: &[u8]) -> Result<(), DecodeError> {
        let status = Self::decode(data)?;
        let encoded = serde_json::to_vec(&status)?;

        {
            let mut history = self.history.lock();
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(status);
        }

        if self.output.send(encoded).await.is_err() {
            tracing::debug!("Worker status output closed");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Recorded reports, oldest first
    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.history.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl SubscriptionHandler for WorkerStatusHandler {
    async fn handle_message(&self, message: PubSubMessage) {
        if let Err(e) = self.process(&message.data).await {
            tracing::error!("Dropping worker status from {}: {}", message.propagation_source, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::PeerId;

    fn report(peer: &str, data: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&WorkerStatus {
            peer_id: peer.to_string(),
            data: data.to_vec(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_well_formed_report_is_recorded_and_emitted_once() {
        let (handler, mut output) = WorkerStatusHandler::channel(8, 8);

        handler.process(&report("worker-1", b"busy")).await.unwrap();

        assert_eq!(handler.len(), 1);
        let emitted = output.try_recv().unwrap();
        let decoded: WorkerStatus = serde_json::from_slice(&emitted).unwrap();
        assert_eq!(decoded.peer_id, "worker-1");
        assert_eq!(decoded.data, b"busy".to_vec());
        assert!(output.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_report_changes_nothing() {
        let (handler, mut output) = WorkerStatusHandler::channel(8, 8);
        handler.process(&report("worker-1", b"ok")).await.unwrap();
        let _ = output.try_recv();

        assert!(handler.process(b"not json").await.is_err());
        assert!(handler.process(br#"{"peerId": 7}"#).await.is_err());

        assert_eq!(handler.len(), 1);
        assert!(output.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oldest_report_is_evicted() {
        let (handler, _output) = WorkerStatusHandler::channel(2, 8);
        for name in ["a", "b", "c"] {
            handler.process(&report(name, b"")).await.unwrap();
        }

        let peers: Vec<String> = handler.snapshot().into_iter().map(|s| s.peer_id).collect();
        assert_eq!(peers, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_wire_format() {
        let status = WorkerStatus {
            peer_id: "16Uiu2".into(),
            data: b"hi".to_vec(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, serde_json::json!({"peerId": "16Uiu2", "Data": "aGk="}));

        let missing_data: WorkerStatus = serde_json::from_str(r#"{"peerId":"x"}"#).unwrap();
        assert!(missing_data.data.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_handler_swallows_decode_errors() {
        let (handler, mut output) = WorkerStatusHandler::channel(4, 4);
        handler
            .handle_message(PubSubMessage {
                source: None,
                propagation_source: PeerId::random(),
                topic: crate::protocol::WORKER_STATUS_TOPIC.into(),
                data: b"{".to_vec(),
            })
            .await;

        assert!(handler.is_empty());
        assert!(output.try_recv().is_err());
    }
}
