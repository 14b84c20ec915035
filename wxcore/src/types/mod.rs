pub mod contact;
pub mod events;
pub mod message;
