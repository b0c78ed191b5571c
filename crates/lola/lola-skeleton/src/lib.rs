mod event_layout;
mod skeleton;

pub use event_layout::EventTypeLayout;
pub use skeleton::Skeleton;
