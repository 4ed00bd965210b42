use std::sync::Arc;

use config::Config;
use location::LocationStore;
use rides::RideRepository;

pub mod config;
pub mod error;
pub mod location;
pub mod middleware;
pub mod rides;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub locations: LocationStore,
    pub rides: Arc<dyn RideRepository>,
}
