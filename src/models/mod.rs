pub mod audit;
pub mod booking;
pub mod payment;
pub mod seat;
pub mod showtime;

pub use audit::{BookingEvent, BookingEventKind};
pub use booking::{BookingKeys, BookingStatus, NewBooking, SeatBooking};
pub use payment::{NewPayment, Payment, PaymentDetail, PaymentStatus};
pub use seat::{Seat, Studio};
pub use showtime::{Movie, NewShowtime, Showtime};
