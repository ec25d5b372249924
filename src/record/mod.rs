pub mod sink;
pub mod store;

pub use sink::RecordPolicy;
pub use sink::RecordingSink;
pub use store::FrameStore;
