// Swerve module runtime: drive + steer actuation for one or more wheel modules

pub mod config;
pub mod messages;
pub mod runtime;
pub mod swerve;
