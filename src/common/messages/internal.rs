use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "m")]
pub enum WireMessage {
    #[serde(rename = "client_cert_req")]
    ClientCertReq(WireClientCertReq),

    #[serde(rename = "get_addr_req")]
    GetAddrReq,

    #[serde(rename = "get_addr_res")]
    GetAddrRes(WireGetAddrRes),

    #[serde(rename = "find_tracker_req")]
    FindTrackerReq(WireFindTrackerReq),

    #[serde(rename = "find_tracker_res")]
    FindTrackerRes(WireFindTrackerRes),

    #[serde(rename = "find_resource_req")]
    FindResourceReq(WireFindResourceReq),

    #[serde(rename = "find_resource_res")]
    FindResourceRes(WireFindResourceRes),

    #[serde(rename = "put_resource_req")]
    PutResourceReq(WirePutResourceReq),

    #[serde(rename = "put_resource_res")]
    PutResourceRes(WirePutResourceRes),
}

// === CLIENT CERT ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireClientCertReq {
    #[serde(with = "serde_bytes")]
    pub cert: Vec<u8>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub sign: Option<Vec<u8>>,
}

// === GET ADDR ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireGetAddrRes {
    #[serde(default)]
    pub addrs: Vec<String>,
}

// === FIND TRACKER ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireTracker {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(default)]
    pub addrs: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireFindTrackerReq {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireFindTrackerRes {
    pub status: u8,

    #[serde(default)]
    pub candidates: Vec<WireTracker>,
}

// === FIND RESOURCE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireFindResourceReq {
    #[serde(rename = "type")]
    pub resource_type: u8,

    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireFindResourceRes {
    pub status: u8,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<WireResource>,

    #[serde(default)]
    pub candidates: Vec<WireTracker>,
}

// === PUT RESOURCE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WirePutResourceReq {
    #[serde(rename = "type")]
    pub resource_type: u8,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<WireResource>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WirePutResourceRes {
    pub status: u8,
}

// === RESOURCES ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind")]
pub enum WireResource {
    #[serde(rename = "user")]
    User(WireUser),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireUser {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub bio: String,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub avatar: Option<Vec<u8>>,

    #[serde(with = "serde_bytes")]
    pub cert: Vec<u8>,

    #[serde(default)]
    pub addrs: Vec<String>,
}
