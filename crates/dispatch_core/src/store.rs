//! Ride persistence seam: a document store with atomic single-document updates.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::RideError;
use crate::ids::RideId;
use crate::ride::Ride;

/// Mutation applied by [`RideStore::update`]. Returning an error aborts the
/// update and leaves the stored document untouched.
pub type RideUpdate<'a> = &'a (dyn Fn(&mut Ride) -> Result<(), RideError> + Send + Sync);

#[async_trait]
pub trait RideStore: Send + Sync {
    /// Persist a new ride. Fails with [`RideError::Store`] if the id exists.
    async fn insert(&self, ride: Ride) -> Result<(), RideError>;

    async fn get(&self, ride_id: RideId) -> Result<Option<Ride>, RideError>;

    /// Apply `update` to the current document and persist the result,
    /// atomically with respect to every other update of the same ride.
    ///
    /// This is the only way ride state changes: preconditions checked inside
    /// `update` hold at write time, so two racing writers can never both win.
    async fn update(&self, ride_id: RideId, update: RideUpdate<'_>) -> Result<Ride, RideError>;
}

/// In-memory [`RideStore`]. Each shard lock of the map serializes updates to
/// the rides it holds.
#[derive(Debug, Default)]
pub struct InMemoryRideStore {
    rides: DashMap<RideId, Ride>,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }
}

#[async_trait]
impl RideStore for InMemoryRideStore {
    async fn insert(&self, ride: Ride) -> Result<(), RideError> {
        match self.rides.entry(ride.id) {
            Entry::Occupied(_) => Err(RideError::Store(format!("ride {} already exists", ride.id))),
            Entry::Vacant(slot) => {
                slot.insert(ride);
                Ok(())
            }
        }
    }

    async fn get(&self, ride_id: RideId) -> Result<Option<Ride>, RideError> {
        Ok(self.rides.get(&ride_id).map(|ride| ride.clone()))
    }

    async fn update(&self, ride_id: RideId, update: RideUpdate<'_>) -> Result<Ride, RideError> {
        let mut stored = self
            .rides
            .get_mut(&ride_id)
            .ok_or(RideError::NotFound(ride_id))?;
        let mut next = stored.clone();
        update(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }
}
