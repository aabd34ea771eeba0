pub mod user;
pub mod event;
pub mod seat;
pub mod booking;
pub mod payment;

pub use user::{Requester, Role};
pub use event::{AvailabilitySummary, Event, NewEvent};
pub use seat::{NewSeat, Seat};
pub use booking::{BookedSeat, Booking, BookingDetails, BookingStatus, BookingSummary};
pub use payment::{Payment, PaymentOutcome, PaymentStatus, Refund};
