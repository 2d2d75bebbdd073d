//! Shared camera pipeline: one capture loop feeding a freshest-wins channel,
//! started and stopped by the set of attached viewers.

pub mod channel;
pub mod fps;
pub mod frame;
pub mod source;
pub mod supervisor;

pub use channel::{FrameSubscriber, LatestFrameChannel};
pub use fps::FpsMeter;
pub use frame::Frame;
pub use source::FrameSource;
pub use supervisor::StreamSupervisor;
