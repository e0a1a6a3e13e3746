//! Serialize and deserialize tracker session messages.
//!
//! Every message is a single bencoded dictionary tagged by its kind under the `m` key.

mod internal;

use crate::common::{Id, PeerTracker};
use crate::{Error, Result};

use internal::{
    WireClientCertReq, WireFindResourceReq, WireFindResourceRes, WireFindTrackerReq,
    WireFindTrackerRes, WireGetAddrRes, WireMessage, WirePutResourceReq, WirePutResourceRes,
    WireResource, WireTracker, WireUser,
};

#[derive(Debug, PartialEq, Clone)]
/// One message exchanged on a stream, one variant per kind.
pub enum NetMessage {
    /// First and only message on the challenge stream of a tracker session.
    ClientCertReq(ClientCertRequest),

    GetAddrReq,
    GetAddrRes(GetAddrResponse),

    FindTrackerReq(FindTrackerRequest),
    FindTrackerRes(FindTrackerResponse),

    FindResourceReq(FindResourceRequest),
    FindResourceRes(FindResourceResponse),

    PutResourceReq(PutResourceRequest),
    PutResourceRes(PutResourceResponse),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
    Ok,
    NotFound,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ResourceType {
    User,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Resource {
    User(User),
}

#[derive(Debug, PartialEq, Clone, Default)]
/// A user profile as it travels on the wire.
pub struct User {
    /// Raw identifier bytes, expected to be [crate::ID_SIZE] long.
    pub id: Vec<u8>,
    pub name: String,
    pub email: String,
    pub bio: String,
    pub avatar: Option<Vec<u8>>,
    pub cert_der: Vec<u8>,
    pub addresses: Vec<String>,
}

// === CLIENT CERT ===

#[derive(Debug, PartialEq, Clone)]
pub struct ClientCertRequest {
    pub cert_der: Vec<u8>,
    /// Signature over the responder's certificate, not expected during the challenge.
    pub server_cert_sign: Option<Vec<u8>>,
}

// === GET ADDR ===

#[derive(Debug, PartialEq, Clone)]
pub struct GetAddrResponse {
    pub addresses: Vec<String>,
}

// === FIND TRACKER ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindTrackerRequest {
    pub id: Vec<u8>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindTrackerResponse {
    pub status: Status,
    pub candidates: Vec<PeerTracker>,
}

// === FIND RESOURCE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindResourceRequest {
    pub resource_type: ResourceType,
    pub id: Vec<u8>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindResourceResponse {
    pub status: Status,
    pub resource: Option<Resource>,
    pub candidate_trackers: Vec<PeerTracker>,
}

// === PUT RESOURCE ===

#[derive(Debug, PartialEq, Clone)]
pub struct PutResourceRequest {
    pub resource_type: ResourceType,
    pub resource: Option<Resource>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PutResourceResponse {
    pub status: Status,
}

impl NetMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<NetMessage> {
        NetMessage::from_serde_message(serde_bencode::from_bytes(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_bencode::to_bytes(&self.clone().into_serde_message())?)
    }

    /// Short name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NetMessage::ClientCertReq(_) => "client_cert_req",
            NetMessage::GetAddrReq => "get_addr_req",
            NetMessage::GetAddrRes(_) => "get_addr_res",
            NetMessage::FindTrackerReq(_) => "find_tracker_req",
            NetMessage::FindTrackerRes(_) => "find_tracker_res",
            NetMessage::FindResourceReq(_) => "find_resource_req",
            NetMessage::FindResourceRes(_) => "find_resource_res",
            NetMessage::PutResourceReq(_) => "put_resource_req",
            NetMessage::PutResourceRes(_) => "put_resource_res",
        }
    }

    fn into_serde_message(self) -> WireMessage {
        match self {
            NetMessage::ClientCertReq(ClientCertRequest {
                cert_der,
                server_cert_sign,
            }) => WireMessage::ClientCertReq(WireClientCertReq {
                cert: cert_der,
                sign: server_cert_sign,
            }),
            NetMessage::GetAddrReq => WireMessage::GetAddrReq,
            NetMessage::GetAddrRes(GetAddrResponse { addresses }) => {
                WireMessage::GetAddrRes(WireGetAddrRes { addrs: addresses })
            }
            NetMessage::FindTrackerReq(FindTrackerRequest { id }) => {
                WireMessage::FindTrackerReq(WireFindTrackerReq { id })
            }
            NetMessage::FindTrackerRes(FindTrackerResponse { status, candidates }) => {
                WireMessage::FindTrackerRes(WireFindTrackerRes {
                    status: status.code(),
                    candidates: trackers_to_wire(candidates),
                })
            }
            NetMessage::FindResourceReq(FindResourceRequest { resource_type, id }) => {
                WireMessage::FindResourceReq(WireFindResourceReq {
                    resource_type: resource_type.code(),
                    id,
                })
            }
            NetMessage::FindResourceRes(FindResourceResponse {
                status,
                resource,
                candidate_trackers,
            }) => WireMessage::FindResourceRes(WireFindResourceRes {
                status: status.code(),
                resource: resource.map(Resource::into_wire),
                candidates: trackers_to_wire(candidate_trackers),
            }),
            NetMessage::PutResourceReq(PutResourceRequest {
                resource_type,
                resource,
            }) => WireMessage::PutResourceReq(WirePutResourceReq {
                resource_type: resource_type.code(),
                resource: resource.map(Resource::into_wire),
            }),
            NetMessage::PutResourceRes(PutResourceResponse { status }) => {
                WireMessage::PutResourceRes(WirePutResourceRes {
                    status: status.code(),
                })
            }
        }
    }

    fn from_serde_message(msg: WireMessage) -> Result<NetMessage> {
        Ok(match msg {
            WireMessage::ClientCertReq(WireClientCertReq { cert, sign }) => {
                NetMessage::ClientCertReq(ClientCertRequest {
                    cert_der: cert,
                    server_cert_sign: sign,
                })
            }
            WireMessage::GetAddrReq => NetMessage::GetAddrReq,
            WireMessage::GetAddrRes(WireGetAddrRes { addrs }) => {
                NetMessage::GetAddrRes(GetAddrResponse { addresses: addrs })
            }
            WireMessage::FindTrackerReq(WireFindTrackerReq { id }) => {
                NetMessage::FindTrackerReq(FindTrackerRequest { id })
            }
            WireMessage::FindTrackerRes(WireFindTrackerRes { status, candidates }) => {
                NetMessage::FindTrackerRes(FindTrackerResponse {
                    status: Status::from_code(status)?,
                    candidates: trackers_from_wire(candidates)?,
                })
            }
            WireMessage::FindResourceReq(WireFindResourceReq { resource_type, id }) => {
                NetMessage::FindResourceReq(FindResourceRequest {
                    resource_type: ResourceType::from_code(resource_type)?,
                    id,
                })
            }
            WireMessage::FindResourceRes(WireFindResourceRes {
                status,
                resource,
                candidates,
            }) => NetMessage::FindResourceRes(FindResourceResponse {
                status: Status::from_code(status)?,
                resource: resource.map(Resource::from_wire),
                candidate_trackers: trackers_from_wire(candidates)?,
            }),
            WireMessage::PutResourceReq(WirePutResourceReq {
                resource_type,
                resource,
            }) => NetMessage::PutResourceReq(PutResourceRequest {
                resource_type: ResourceType::from_code(resource_type)?,
                resource: resource.map(Resource::from_wire),
            }),
            WireMessage::PutResourceRes(WirePutResourceRes { status }) => {
                NetMessage::PutResourceRes(PutResourceResponse {
                    status: Status::from_code(status)?,
                })
            }
        })
    }
}

impl Status {
    fn code(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::NotFound => 1,
        }
    }

    fn from_code(code: u8) -> Result<Status> {
        match code {
            0 => Ok(Status::Ok),
            1 => Ok(Status::NotFound),
            _ => Err(Error::InvalidMessage("unknown status code")),
        }
    }
}

impl ResourceType {
    fn code(self) -> u8 {
        match self {
            ResourceType::User => 0,
        }
    }

    fn from_code(code: u8) -> Result<ResourceType> {
        match code {
            0 => Ok(ResourceType::User),
            _ => Err(Error::InvalidMessage("unknown resource type")),
        }
    }
}

impl Resource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::User(_) => ResourceType::User,
        }
    }

    fn into_wire(self) -> WireResource {
        match self {
            Resource::User(user) => WireResource::User(WireUser {
                id: user.id,
                name: user.name,
                email: user.email,
                bio: user.bio,
                avatar: user.avatar,
                cert: user.cert_der,
                addrs: user.addresses,
            }),
        }
    }

    fn from_wire(resource: WireResource) -> Resource {
        match resource {
            WireResource::User(user) => Resource::User(User {
                id: user.id,
                name: user.name,
                email: user.email,
                bio: user.bio,
                avatar: user.avatar,
                cert_der: user.cert,
                addresses: user.addrs,
            }),
        }
    }
}

fn trackers_to_wire(trackers: Vec<PeerTracker>) -> Vec<WireTracker> {
    trackers
        .into_iter()
        .map(|tracker| WireTracker {
            id: tracker.id.to_vec(),
            addrs: tracker.addresses,
        })
        .collect()
}

fn trackers_from_wire(trackers: Vec<WireTracker>) -> Result<Vec<PeerTracker>> {
    trackers
        .into_iter()
        .map(|tracker| Ok(PeerTracker::new(Id::from_bytes(&tracker.id)?, tracker.addrs)))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_client_cert_request() {
        let original_msg = NetMessage::ClientCertReq(ClientCertRequest {
            cert_der: vec![48, 130, 1, 10],
            server_cert_sign: None,
        });

        let serde_msg = original_msg.clone().into_serde_message();
        let bytes = serde_bencode::to_bytes(&serde_msg).unwrap();
        let parsed_serde_msg: WireMessage = serde_bencode::from_bytes(&bytes).unwrap();
        let parsed_msg = NetMessage::from_serde_message(parsed_serde_msg).unwrap();
        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_get_addr_request_is_a_bare_tag() {
        let bytes = NetMessage::GetAddrReq.to_bytes().unwrap();

        assert_eq!(bytes, b"d1:m12:get_addr_reqe");
        assert_eq!(NetMessage::from_bytes(&bytes).unwrap(), NetMessage::GetAddrReq);
    }

    #[test]
    fn test_find_resource_response_with_user() {
        let original_msg = NetMessage::FindResourceRes(FindResourceResponse {
            status: Status::Ok,
            resource: Some(Resource::User(User {
                id: Id::random().to_vec(),
                name: "alice".to_string(),
                email: "alice@example.com".to_string(),
                bio: String::new(),
                avatar: Some(vec![0, 1, 2, 255]),
                cert_der: vec![48, 3, 2, 1, 0],
                addresses: vec!["192.0.2.1:7000".to_string()],
            })),
            candidate_trackers: vec![],
        });

        let bytes = original_msg.to_bytes().unwrap();
        assert_eq!(NetMessage::from_bytes(&bytes).unwrap(), original_msg);
    }

    #[test]
    fn test_find_tracker_response_candidates() {
        let original_msg = NetMessage::FindTrackerRes(FindTrackerResponse {
            status: Status::Ok,
            candidates: vec![
                PeerTracker::new(Id::random(), vec!["192.0.2.1:7000".to_string()]),
                PeerTracker::new(Id::random(), vec!["[2001:db8::1]:7000".to_string()]),
            ],
        });

        let bytes = original_msg.to_bytes().unwrap();
        assert_eq!(NetMessage::from_bytes(&bytes).unwrap(), original_msg);
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        assert!(NetMessage::from_bytes(b"d1:m7:unknowne").is_err());
        assert!(NetMessage::from_bytes(b"not bencode").is_err());
    }

    #[test]
    fn test_unknown_resource_type_is_invalid() {
        let bytes = b"d2:id20:aaaaaaaaaaaaaaaaaaaa1:m17:find_resource_req4:typei9ee";

        assert!(matches!(
            NetMessage::from_bytes(bytes),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_candidate_with_bad_id_is_rejected() {
        let bytes = b"d10:candidatesld5:addrsle2:id3:abcee1:m16:find_tracker_res6:statusi0ee";

        assert!(matches!(
            NetMessage::from_bytes(bytes),
            Err(Error::InvalidIdSize(3))
        ));
    }
}
