mod handler;
mod model;

pub use handler::{decrease_seats, increase_seats};
pub use model::SeatRequest;
