//! Durable state of a tracker: known peer trackers and published resources.

mod blobs;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::common::{Id, PeerTracker};
use crate::Result;

pub use blobs::BlobStore;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A stored user profile. The avatar itself lives in the [BlobStore].
pub struct UserRecord {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub bio: String,
    pub has_avatar: bool,
    pub cert_der: Vec<u8>,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone)]
/// Handle to the SQLite database, cheap to clone and safe to share between tasks.
///
/// Every query runs on tokio's blocking pool.
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Database> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Database> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Database> {
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS peer_tracker (
                id BLOB PRIMARY KEY,
                addresses BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                bio TEXT NOT NULL,
                has_avatar INTEGER NOT NULL,
                cert_der BLOB NOT NULL,
                addresses BLOB NOT NULL
            );",
        )?;

        Ok(Database {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    // === Peer trackers ===

    /// Every persisted peer tracker, skipping rows that cannot be decoded.
    pub async fn load_trackers(&self) -> Result<Vec<PeerTracker>> {
        let rows = self
            .run(|connection| {
                let mut statement = connection.prepare("SELECT id, addresses FROM peer_tracker")?;
                let rows = statement
                    .query_map([], |row| {
                        Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(rows)
            })
            .await?;

        let mut trackers = Vec::with_capacity(rows.len());

        for (id, addresses) in rows {
            match (Id::from_bytes(&id), decode_addresses(&addresses)) {
                (Ok(id), Ok(addresses)) => trackers.push(PeerTracker::new(id, addresses)),
                (id, addresses) => {
                    warn!(?id, ?addresses, "Skipping undecodable peer tracker row")
                }
            }
        }

        Ok(trackers)
    }

    /// Persist a tracker unless its id is already stored. Returns `true` if it was inserted.
    pub async fn insert_tracker_if_absent(&self, tracker: &PeerTracker) -> Result<bool> {
        let id = tracker.id.to_vec();
        let addresses = encode_addresses(&tracker.addresses)?;

        self.run(move |connection| {
            let inserted = connection.execute(
                "INSERT INTO peer_tracker(id, addresses) VALUES(?1, ?2)
                 ON CONFLICT(id) DO NOTHING",
                params![id, addresses],
            )?;

            Ok(inserted == 1)
        })
        .await
    }

    // === Users ===

    pub async fn get_user(&self, id: &Id) -> Result<Option<UserRecord>> {
        let id = *id;

        let row = self
            .run(move |connection| {
                Ok(connection
                    .query_row(
                        "SELECT name, email, bio, has_avatar, cert_der, addresses
                         FROM user WHERE id = ?1",
                        params![id.to_vec()],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, bool>(3)?,
                                row.get::<_, Vec<u8>>(4)?,
                                row.get::<_, Vec<u8>>(5)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        let Some((name, email, bio, has_avatar, cert_der, addresses)) = row else {
            return Ok(None);
        };

        Ok(Some(UserRecord {
            id,
            name,
            email,
            bio,
            has_avatar,
            cert_der,
            addresses: decode_addresses(&addresses)?,
        }))
    }

    /// Insert the user, or replace every field of the stored one.
    pub async fn upsert_user(&self, user: UserRecord) -> Result<()> {
        let addresses = encode_addresses(&user.addresses)?;

        self.run(move |connection| {
            connection.execute(
                "INSERT INTO user(id, name, email, bio, has_avatar, cert_der, addresses)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    bio = excluded.bio,
                    has_avatar = excluded.has_avatar,
                    cert_der = excluded.cert_der,
                    addresses = excluded.addresses",
                params![
                    user.id.to_vec(),
                    user.name,
                    user.email,
                    user.bio,
                    user.has_avatar,
                    user.cert_der,
                    addresses
                ],
            )?;

            Ok(())
        })
        .await
    }

    // === Private Methods ===

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = self.connection.clone();

        tokio::task::spawn_blocking(move || {
            let connection = connection.lock().unwrap_or_else(PoisonError::into_inner);
            f(&connection)
        })
        .await?
    }
}

fn encode_addresses(addresses: &[String]) -> Result<Vec<u8>> {
    Ok(serde_bencode::to_bytes(&addresses)?)
}

fn decode_addresses(bytes: &[u8]) -> Result<Vec<String>> {
    Ok(serde_bencode::from_bytes(bytes)?)
}

#[cfg(test)]
mod test {
    use super::*;

    fn user(id: Id) -> UserRecord {
        UserRecord {
            id,
            name: "alice".to_string(),
            email: "alice@example.com".to_string(),
            bio: "hello".to_string(),
            has_avatar: false,
            cert_der: vec![48, 3, 2, 1, 0],
            addresses: vec!["192.0.2.1:7000".to_string(), "[2001:db8::1]:7000".to_string()],
        }
    }

    #[tokio::test]
    async fn insert_tracker_only_once() {
        let database = Database::open_in_memory().unwrap();

        let tracker = PeerTracker::random();
        let moved = PeerTracker::new(tracker.id, vec!["10.1.1.1:1".to_string()]);

        assert!(database.insert_tracker_if_absent(&tracker).await.unwrap());
        assert!(!database.insert_tracker_if_absent(&moved).await.unwrap());

        assert_eq!(database.load_trackers().await.unwrap(), vec![tracker]);
    }

    #[tokio::test]
    async fn concurrent_inserts_are_idempotent() {
        let database = Database::open_in_memory().unwrap();
        let tracker = PeerTracker::random();

        let (a, b) = tokio::join!(
            database.insert_tracker_if_absent(&tracker),
            database.insert_tracker_if_absent(&tracker)
        );

        assert!(a.unwrap() ^ b.unwrap());
        assert_eq!(database.load_trackers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_user() {
        let database = Database::open_in_memory().unwrap();

        assert_eq!(database.get_user(&Id::random()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_replaces_all_fields() {
        let database = Database::open_in_memory().unwrap();
        let id = Id::random();

        let first = UserRecord {
            has_avatar: true,
            ..user(id)
        };
        database.upsert_user(first.clone()).await.unwrap();
        assert_eq!(database.get_user(&id).await.unwrap(), Some(first));

        let second = UserRecord {
            name: "bob".to_string(),
            email: String::new(),
            addresses: vec![],
            ..user(id)
        };
        database.upsert_user(second.clone()).await.unwrap();
        assert_eq!(database.get_user(&id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.db");

        let tracker = PeerTracker::random();
        let record = user(Id::random());

        {
            let database = Database::open(&path).unwrap();
            database.insert_tracker_if_absent(&tracker).await.unwrap();
            database.upsert_user(record.clone()).await.unwrap();
        }

        let database = Database::open(&path).unwrap();
        assert_eq!(database.load_trackers().await.unwrap(), vec![tracker]);
        assert_eq!(database.get_user(&record.id).await.unwrap(), Some(record));
    }
}
