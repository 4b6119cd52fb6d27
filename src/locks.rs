//! Per-seat leases.
//!
//! The reservation path takes a lease on the contested seat before it opens
//! its transaction, so concurrent attempts on one seat queue up (or give up
//! with [`BookingError::SeatBusy`]) instead of piling onto the same row lock.
//! Attempts on different seats never wait for each other. The lease is not
//! what prevents a double booking; the locked availability read inside the
//! transaction is.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BookingError;
use crate::redis_client::RedisClient;

const REDIS_RETRY_DELAY: Duration = Duration::from_millis(25);

// Deletes the key only while it still holds our token, so an expired lease
// never removes the one that replaced it.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Proof of holding a seat. Hand it back through [`SeatLocks::release`];
/// a lease that is simply dropped is released too (the local guard unlocks,
/// the Redis key runs out its TTL).
#[derive(Debug)]
pub struct SeatLease {
    seat_id: Uuid,
    handle: LeaseHandle,
}

#[derive(Debug)]
enum LeaseHandle {
    Token { key: String, token: String },
    Guard(OwnedMutexGuard<()>),
    /// The lock backend was unreachable; the caller proceeds on row locks only.
    Unguarded,
}

impl SeatLease {
    pub fn seat_id(&self) -> Uuid {
        self.seat_id
    }

    pub fn is_guarded(&self) -> bool {
        !matches!(self.handle, LeaseHandle::Unguarded)
    }
}

#[async_trait]
pub trait SeatLocks: Send + Sync {
    /// Waits for the seat's lease; `SeatBusy` once the wait budget is spent.
    async fn acquire(&self, seat_id: Uuid) -> Result<SeatLease, BookingError>;

    async fn release(&self, lease: SeatLease);
}

/// Lease shared by every process pointed at the same Redis
/// (`SET key token NX PX ttl`).
pub struct RedisSeatLocks {
    redis: RedisClient,
    ttl: Duration,
    wait: Duration,
}

impl RedisSeatLocks {
    pub fn new(redis: RedisClient, ttl: Duration, wait: Duration) -> Self {
        Self { redis, ttl, wait }
    }

    fn key(seat_id: Uuid) -> String {
        format!("seat:{}:lock", seat_id)
    }

    async fn try_set(&self, key: &str, token: &str) -> redis::RedisResult<bool> {
        let mut conn = self.redis.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl SeatLocks for RedisSeatLocks {
    async fn acquire(&self, seat_id: Uuid) -> Result<SeatLease, BookingError> {
        let key = Self::key(seat_id);
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.wait;

        loop {
            match self.try_set(&key, &token).await {
                Ok(true) => {
                    debug!(%seat_id, "seat lease acquired");
                    return Ok(SeatLease {
                        seat_id,
                        handle: LeaseHandle::Token { key, token },
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(%seat_id, error = %e, "redis unavailable, reserving without seat lease");
                    return Ok(SeatLease {
                        seat_id,
                        handle: LeaseHandle::Unguarded,
                    });
                }
            }

            if Instant::now() >= deadline {
                return Err(BookingError::SeatBusy(seat_id));
            }
            tokio::time::sleep(REDIS_RETRY_DELAY).await;
        }
    }

    async fn release(&self, lease: SeatLease) {
        let LeaseHandle::Token { key, token } = lease.handle else {
            return;
        };
        let mut conn = self.redis.conn.clone();
        let result: redis::RedisResult<i64> = redis::Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(&token)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(0) => warn!(seat_id = %lease.seat_id, "seat lease expired before release"),
            Ok(_) => debug!(seat_id = %lease.seat_id, "seat lease released"),
            Err(e) => warn!(seat_id = %lease.seat_id, error = %e, "failed to release seat lease"),
        }
    }
}

/// In-process lease: one mutex per seat, created on demand and dropped
/// again once nobody holds or waits for it.
pub struct LocalSeatLocks {
    seats: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    wait: Duration,
}

impl LocalSeatLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            seats: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// Number of seats that currently have a mutex allocated.
    pub async fn tracked(&self) -> usize {
        self.seats.lock().await.len()
    }

    async fn prune(&self, seat_id: Uuid) {
        let mut seats = self.seats.lock().await;
        // clones are only handed out under this lock, so a count of one
        // means nobody else holds or waits on this seat
        if seats
            .get(&seat_id)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            seats.remove(&seat_id);
        }
    }
}

#[async_trait]
impl SeatLocks for LocalSeatLocks {
    async fn acquire(&self, seat_id: Uuid) -> Result<SeatLease, BookingError> {
        let mutex = self
            .seats
            .lock()
            .await
            .entry(seat_id)
            .or_default()
            .clone();

        match tokio::time::timeout(self.wait, mutex.lock_owned()).await {
            Ok(guard) => Ok(SeatLease {
                seat_id,
                handle: LeaseHandle::Guard(guard),
            }),
            Err(_) => {
                self.prune(seat_id).await;
                Err(BookingError::SeatBusy(seat_id))
            }
        }
    }

    async fn release(&self, lease: SeatLease) {
        let seat_id = lease.seat_id;
        drop(lease);
        self.prune(seat_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_holder_of_same_seat_times_out() {
        let locks = LocalSeatLocks::new(Duration::from_millis(20));
        let seat = Uuid::new_v4();

        let lease = locks.acquire(seat).await.unwrap();
        assert!(lease.is_guarded());

        let err = locks.acquire(seat).await.unwrap_err();
        assert!(matches!(err, BookingError::SeatBusy(id) if id == seat));

        locks.release(lease).await;
        let again = locks.acquire(seat).await.unwrap();
        assert_eq!(again.seat_id(), seat);
    }

    #[tokio::test]
    async fn different_seats_do_not_contend() {
        let locks = LocalSeatLocks::new(Duration::from_millis(20));
        let a = locks.acquire(Uuid::new_v4()).await.unwrap();
        let b = locks.acquire(Uuid::new_v4()).await.unwrap();
        assert_ne!(a.seat_id(), b.seat_id());
        assert_eq!(locks.tracked().await, 2);
    }

    #[tokio::test]
    async fn released_seats_are_forgotten() {
        let locks = LocalSeatLocks::new(Duration::from_millis(20));
        let lease = locks.acquire(Uuid::new_v4()).await.unwrap();
        locks.release(lease).await;
        assert_eq!(locks.tracked().await, 0);
    }

    #[tokio::test]
    async fn waiter_gets_seat_once_holder_releases() {
        let locks = Arc::new(LocalSeatLocks::new(Duration::from_secs(2)));
        let seat = Uuid::new_v4();
        let lease = locks.acquire(seat).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(seat).await.map(|l| l.seat_id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        locks.release(lease).await;

        assert_eq!(waiter.await.unwrap().unwrap(), seat);
    }
}
