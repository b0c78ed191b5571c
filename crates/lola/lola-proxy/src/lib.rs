mod handle;
mod proxy;
mod sample;

pub use handle::ServiceInstanceHandle;
pub use proxy::Proxy;
pub use sample::SampleRef;
