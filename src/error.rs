/// Pipeline-level failures.
///
/// Device and adapter errors are fatal environment problems; retrying an
/// unchanged request cannot succeed. Capacity errors reject the operation
/// before any partial work is issued.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no compatible GPU adapter: {0}")]
    AdapterUnavailable(#[from] wgpu::RequestAdapterError),

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("requested {requested} elements exceeds the hard limit of {max}")]
    CapacityExceeded { requested: u64, max: u64 },
}
