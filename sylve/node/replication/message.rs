use serde::{Deserialize, Serialize};
use sylve_lib::core::{
    planner::ReplicationPlan,
    snapshot::{Dataset, Snapshot},
};

use crate::node::store::event::BackupReplicationEvent;

/// Client frame. Every frame carries the cluster credential; the server
/// verifies it before touching storage.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ClientRequest {
    pub token: String,
    pub body: RequestBody,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum RequestBody {
    /// List datasets, optionally filtered by name prefix
    ListDatasets { prefix: Option<String> },
    /// Snapshot chain of one dataset, empty if it does not exist
    ListSnapshots { dataset: String },
    /// Recent replication events, newest first, bounded page size
    ListEvents { limit: usize },
    /// Ask the server to plan and stream a transfer towards the caller
    Pull(PullRequest),
    /// Announce an inbound stream computed on the caller
    Push(PushRequest),
    /// Snapshot stream data following a [`RequestBody::Push`]
    Chunk(Vec<u8>),
    /// End of an inbound stream
    Done,
    /// Inbound stream failed on the sending side
    Abort(String),
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct PullRequest {
    /// Dataset on the serving node
    pub source_dataset: String,
    /// Dataset on the calling node, recorded in the server ledger
    pub destination_dataset: String,
    /// The caller's snapshot chain of the destination dataset; the server
    /// plans against it
    pub destination_chain: Vec<Snapshot>,
    /// Pin the transfer to a labeled snapshot instead of the latest
    pub snapshot: Option<String>,
    pub force: bool,
    pub with_intermediates: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct PushRequest {
    /// Plan computed on the calling node; the server receives into the
    /// plan's destination dataset
    pub plan: ReplicationPlan,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum Response {
    Datasets(Vec<Dataset>),
    Snapshots(Vec<Snapshot>),
    Events(Vec<BackupReplicationEvent>),
    /// Plan the server is about to stream; followed by `Chunk`s and `Done`
    PullPlan(ReplicationPlan),
    /// Server is ready to receive an announced push stream
    Ready,
    Chunk(Vec<u8>),
    Done,
    Error { code: String, message: String },
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum Request {
    Client(ClientRequest),
    Server(Response),
}

impl Request {
    pub fn get_client(self) -> Option<ClientRequest> {
        match self {
            Request::Client(r) => Some(r),
            Request::Server(_) => None,
        }
    }

    pub fn get_server(self) -> Option<Response> {
        match self {
            Request::Server(r) => Some(r),
            Request::Client(_) => None,
        }
    }
}
