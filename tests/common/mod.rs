//! Shared fixtures: an in-memory upload-pack provider and a recording SSH session channel.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use git_upload_serve::protocol::{
    AdvertisedRefs, Capability, Endpoint, ObjectId, ProtocolError, ServerResponse, SideBandMode,
    UploadPack, UploadPackProvider, UploadPackRequest, UploadPackResponse,
    pktline::{add_flush, add_pkt_line_string},
};
use git_upload_serve::ssh::{SessionChannel, SessionRequest};

pub const PACK: &[u8] = b"PACK\x00\x00\x00\x02fake";

pub fn oid(c: char) -> ObjectId {
    c.to_string().repeat(40).parse().unwrap()
}

/// Provider serving `HEAD -> head` on `refs/heads/main` and a fixed pack.
#[derive(Clone)]
pub struct MemoryProvider {
    pub head: ObjectId,
    pub fail: bool,
    pub requests: Arc<Mutex<Vec<UploadPackRequest>>>,
}

impl MemoryProvider {
    pub fn new(head: ObjectId) -> Self {
        Self {
            head,
            fail: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(oid('0'))
        }
    }

    pub fn advertisement(&self) -> AdvertisedRefs {
        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/main".to_string(), self.head.clone());
        AdvertisedRefs {
            head: Some(self.head.clone()),
            refs,
            capabilities: vec![
                Capability::OfsDelta,
                Capability::SideBand64k,
                Capability::SymRef("HEAD:refs/heads/main".to_string()),
            ],
            ..Default::default()
        }
    }
}

#[async_trait]
impl UploadPackProvider for MemoryProvider {
    async fn advertised_refs(&self, _endpoint: &Endpoint) -> Result<AdvertisedRefs, ProtocolError> {
        if self.fail {
            return Err(ProtocolError::RepositoryNotFound("memory".to_string()));
        }
        Ok(self.advertisement())
    }

    async fn upload_pack(
        &self,
        _endpoint: &Endpoint,
        request: UploadPackRequest,
    ) -> Result<UploadPackResponse, ProtocolError> {
        if self.fail {
            return Err(ProtocolError::Pack("memory".to_string()));
        }
        let side_band = SideBandMode::from_capabilities(&request.capabilities);
        self.requests.lock().unwrap().push(request);
        Ok(UploadPackResponse {
            server_response: ServerResponse::Nak,
            side_band,
            pack: Box::pin(futures::stream::once(async {
                Ok(Bytes::from_static(PACK))
            })),
        })
    }
}

/// `want <id>[ caps]`, flush, `done`.
pub fn clone_request(want: &ObjectId, caps: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    if caps.is_empty() {
        add_pkt_line_string(&mut buf, format!("want {want}\n"));
    } else {
        add_pkt_line_string(&mut buf, format!("want {want} {caps}\n"));
    }
    add_flush(&mut buf);
    add_pkt_line_string(&mut buf, "done\n".to_string());
    buf.to_vec()
}

/// Observable traffic on a fake session channel, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Output(Vec<u8>),
    Reply(bool),
    ExitStatus(u32),
}

pub struct RecordingChannel {
    requests: VecDeque<SessionRequest>,
    input: Vec<u8>,
    pub events: Vec<Event>,
    pub consumed: usize,
}

impl RecordingChannel {
    pub fn new(requests: Vec<SessionRequest>, input: Vec<u8>) -> Self {
        Self {
            requests: requests.into(),
            input,
            events: Vec::new(),
            consumed: 0,
        }
    }

    pub fn replies(&self) -> Vec<bool> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Reply(ok) => Some(*ok),
                _ => None,
            })
            .collect()
    }

    pub fn exit_statuses(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::ExitStatus(status) => Some(*status),
                _ => None,
            })
            .collect()
    }

    pub fn output(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Output(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl SessionChannel for RecordingChannel {
    async fn next_request(&mut self) -> Option<SessionRequest> {
        let request = self.requests.pop_front();
        if request.is_some() {
            self.consumed += 1;
        }
        request
    }

    async fn reply(&mut self, success: bool) {
        self.events.push(Event::Reply(success));
    }

    async fn serve<P: UploadPackProvider>(
        &mut self,
        upload_pack: &UploadPack<P>,
    ) -> Result<(), ProtocolError> {
        let input = std::mem::take(&mut self.input);
        let mut output = Vec::new();
        let result = upload_pack.serve(&mut &input[..], &mut output).await;
        if !output.is_empty() {
            self.events.push(Event::Output(output));
        }
        result
    }

    async fn finish(&mut self, exit_status: u32) {
        self.events.push(Event::ExitStatus(exit_status));
    }
}
