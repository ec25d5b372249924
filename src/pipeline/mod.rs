pub mod mailbox;

pub use mailbox::FrameMailbox;
pub use mailbox::Subscription;
