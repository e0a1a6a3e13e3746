//! Finding and publishing resources.

use tracing::{debug, error, warn};

use super::handler::send;
use super::Tracker;
use crate::common::{
    FindResourceRequest, FindResourceResponse, Id, NetMessage, PutResourceRequest,
    PutResourceResponse, Resource, ResourceType, Status, User,
};
use crate::routing::K;
use crate::storage::UserRecord;
use crate::transport::Stream;

impl Tracker {
    pub(super) async fn handle_find_resource(
        &self,
        stream: &mut dyn Stream,
        request: FindResourceRequest,
    ) {
        let Ok(id) = Id::from_bytes(&request.id) else {
            debug!(len = request.id.len(), "Dropping find_resource_req with invalid id");
            return;
        };

        match request.resource_type {
            ResourceType::User => self.find_user(stream, id).await,
        }
    }

    pub(super) async fn handle_put_resource(
        &self,
        stream: &mut dyn Stream,
        request: PutResourceRequest,
    ) {
        match (request.resource_type, request.resource) {
            (ResourceType::User, Some(Resource::User(user))) => self.put_user(stream, user).await,
            (resource_type, None) => {
                debug!(?resource_type, "Dropping put_resource_req without a resource")
            }
        }
    }

    /// Answer with the stored user, or with the closest trackers we know if there is none.
    async fn find_user(&self, stream: &mut dyn Stream, id: Id) {
        let record = match self.database.get_user(&id).await {
            Ok(record) => record,
            Err(error) => {
                error!(%id, ?error, "Failed to query user");
                return;
            }
        };

        let response = match record {
            Some(record) => {
                let avatar = if record.has_avatar {
                    match self.blobs.read(&id).await {
                        Ok(avatar) => Some(avatar),
                        Err(error) => {
                            error!(%id, ?error, "Failed to read avatar");
                            None
                        }
                    }
                } else {
                    None
                };

                FindResourceResponse {
                    status: Status::Ok,
                    resource: Some(Resource::User(user_from_record(record, avatar))),
                    candidate_trackers: vec![],
                }
            }
            None => FindResourceResponse {
                status: Status::NotFound,
                resource: None,
                candidate_trackers: self.routing.get_neighbors(&id, K, None),
            },
        };

        send(stream, &NetMessage::FindResourceRes(response)).await;
    }

    /// Store the avatar first, so a record never claims an avatar that failed to be written.
    async fn put_user(&self, stream: &mut dyn Stream, user: User) {
        let Ok(id) = Id::from_bytes(&user.id) else {
            debug!(len = user.id.len(), "Dropping user with invalid id");
            return;
        };

        if self.require_record_binding && Id::from_certificate(&user.cert_der) != id {
            debug!(%id, "Dropping user whose id is not bound to its certificate");
            return;
        }

        let avatar = user.avatar.filter(|avatar| !avatar.is_empty());

        let put_lock = self.puts.lock().await;

        let has_avatar = match &avatar {
            Some(avatar) => {
                if let Err(error) = self.blobs.write(&id, avatar).await {
                    error!(%id, ?error, "Failed to write avatar");
                    return;
                }
                true
            }
            None => {
                if let Err(error) = self.blobs.remove(&id).await {
                    warn!(%id, ?error, "Failed to remove avatar");
                }
                false
            }
        };

        let record = UserRecord {
            id,
            name: user.name,
            email: user.email,
            bio: user.bio,
            has_avatar,
            cert_der: user.cert_der,
            addresses: user.addresses,
        };

        if let Err(error) = self.database.upsert_user(record).await {
            error!(%id, ?error, "Failed to store user");
            return;
        }
        drop(put_lock);

        debug!(%id, has_avatar, "Stored user");

        send(
            stream,
            &NetMessage::PutResourceRes(PutResourceResponse { status: Status::Ok }),
        )
        .await;
    }
}

fn user_from_record(record: UserRecord, avatar: Option<Vec<u8>>) -> User {
    User {
        id: record.id.to_vec(),
        name: record.name,
        email: record.email,
        bio: record.bio,
        avatar,
        cert_der: record.cert_der,
        addresses: record.addresses,
    }
}
