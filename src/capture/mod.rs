pub mod acquisition;
pub mod frame;
pub mod sim;
pub mod source;

pub use acquisition::AcquisitionLoop;
pub use frame::Frame;
pub use frame::FrameShape;
pub use source::HardwareSource;
