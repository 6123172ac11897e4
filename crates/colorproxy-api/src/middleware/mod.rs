//! API Middleware
//!
//! Request routing by tag, applied to the host application's routes.

pub mod dispatch;

pub use dispatch::dispatch;
