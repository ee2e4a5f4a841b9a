//! The location tracking session and everything it reports.
//!
//! [session::TrackingSession] is mounted by whoever presents tracking to the user. It talks to
//! a [crate::location_api::LocationProvider], forwards samples to a
//! [crate::store::LocationStore] and reports what happens as [notification::Notification]s.

pub mod error;
pub mod notification;
pub mod session;
pub mod shutdown;

pub use self::{
    error::TrackingError,
    notification::Notification,
    session::{StartOutcome, TrackingSession, TrackingStatus, HISTORY_LIMIT},
};
