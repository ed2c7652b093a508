pub mod accessibility;
pub mod events;
