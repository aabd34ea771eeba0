pub mod availability;
pub mod booking;
pub mod cancellation;
pub mod catalog;
pub mod cleanup;
pub mod lifecycle;
pub mod payment;
pub mod reservation;

pub use booking::BookingService;
pub use cleanup::ExpirySweeper;
