pub mod bridge;
pub mod builder;
pub(crate) mod gate;
pub(crate) mod ring;
pub mod scheduler;
