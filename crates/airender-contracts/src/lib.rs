pub mod capabilities;
pub mod catalog;
pub mod errors;
pub mod events;
pub mod samplers;
