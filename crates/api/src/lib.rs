//! HotelOps HTTP surface: staff ticket board, guest service requests and the
//! notification dispatch trigger.

pub mod middleware;
pub mod routes;
pub mod state;
