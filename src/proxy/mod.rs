pub mod accounting;
pub mod convert;
pub mod failover;
pub mod handler;
pub mod resolver;
pub mod sse;
pub mod stream;
pub mod upstream;
