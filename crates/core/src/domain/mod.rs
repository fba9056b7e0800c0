pub mod context;
pub mod session;
