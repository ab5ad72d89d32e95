//! Binary codec for the db-server wire protocol.

pub mod field;
pub mod message;

pub use field::Field;
pub use message::{
    requesting_party, KnownType, MenuIdentifier, Message, MessageType, MENU_PAGE_SIZE,
    MESSAGE_START, NO_MENU_RESULTS_AVAILABLE,
};
