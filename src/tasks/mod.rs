//! Background tasks spawned at startup.

mod sweeper;

pub use sweeper::RegistrySweeper;
