pub mod demo;
pub mod owner;

pub use demo::DemoMode;
pub use owner::OwnerId;
