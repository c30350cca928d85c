pub mod change;
pub mod ticket;

pub use change::{ChangeDecodeError, ChangeOperation, CodeChange, WireChange};
pub use ticket::{Ticket, TicketKey, TicketKeyError};
