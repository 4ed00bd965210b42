mod handler;
mod model;
mod stream;

pub use handler::{get_latest, stream_location, update_location};
pub use model::UpdateLocationRequest;
