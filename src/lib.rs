#![doc = include_str!("../README.md")]

// Public modules
mod common;
mod error;

pub mod bootstrap;
pub mod config;
pub mod identity;
pub mod process;
pub mod routing;
pub mod server;
pub mod storage;
pub mod transport;

pub use crate::common::{
    messages, ClientCertRequest, FindResourceRequest, FindResourceResponse, FindTrackerRequest,
    FindTrackerResponse, GetAddrResponse, Id, NetMessage, PeerTracker, PutResourceRequest,
    PutResourceResponse, Resource, ResourceType, Status, User, ID_SIZE,
};
pub use error::{Error, Result};
pub use server::Tracker;
