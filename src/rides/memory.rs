use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{Ride, RideRepository, SeatChange};
use crate::error::LocationError;

#[derive(Default)]
pub struct MemoryRideRepository {
    rides: Mutex<HashMap<String, Ride>>,
}

impl MemoryRideRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ride: Ride) {
        self.rides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ride.ride_id.clone(), ride);
    }
}

#[async_trait]
impl RideRepository for MemoryRideRepository {
    async fn find(&self, ride_id: &str) -> Result<Option<Ride>, LocationError> {
        let rides = self.rides.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rides.get(ride_id).cloned())
    }

    async fn adjust_seats(
        &self,
        ride_id: &str,
        change: SeatChange,
        count: i32,
    ) -> Result<Option<Ride>, LocationError> {
        let mut rides = self.rides.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(ride) = rides.get_mut(ride_id) else {
            return Ok(None);
        };

        let available = match change {
            SeatChange::Decrease => ride.available_seats - count,
            SeatChange::Increase => ride.available_seats + count,
        };
        if !(0..=ride.total_seats).contains(&available) {
            return Ok(None);
        }

        ride.available_seats = available;
        Ok(Some(ride.clone()))
    }
}
