//! Ports - traits the application depends on, implemented by infrastructure

pub mod outbound;
