mod docker;
mod native;

pub(crate) use docker::daemon_unavailable;
pub use docker::DockerBackend;
pub use native::NativeBackend;
