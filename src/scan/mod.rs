//! Parallel exclusive prefix sum over u32 counters.
//!
//! [`PrefixScan`] is the capability the rest of the pipeline programs
//! against: fill the input buffer, `record` the dispatches, read offsets
//! from the output buffer. [`csdl::ChainedScanDecoupledLookback`] is the
//! one concrete algorithm; alternative scans can be slotted in without
//! touching callers.

pub mod csdl;

use crate::error::PipelineError;

/// Hard ceiling on the logical scan size. Larger requests are rejected,
/// never truncated.
pub const MAX_SCAN_SIZE: u32 = 1 << 20;

/// Elements processed per partition: 256 threads, one vec4 each.
pub const PARTITION_SIZE: u32 = 1024;

/// Round up to the vec4 load width.
pub fn align4(n: u32) -> u32 {
    n.div_ceil(4) * 4
}

pub fn partition_count(aligned: u32) -> u32 {
    aligned.max(1).div_ceil(PARTITION_SIZE)
}

/// Reject logical sizes over [`MAX_SCAN_SIZE`] before any device work.
pub fn check_capacity(size: u32) -> Result<(), PipelineError> {
    if size > MAX_SCAN_SIZE {
        return Err(PipelineError::CapacityExceeded {
            requested: size as u64,
            max: MAX_SCAN_SIZE as u64,
        });
    }
    Ok(())
}

/// An exclusive-scan algorithm over a GPU-resident u32 array.
pub trait PrefixScan {
    /// Set the logical element count. Must be called before the first
    /// `record` and again whenever the count changes; buffer reallocation
    /// only happens when the aligned capacity actually changes.
    fn resize(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, size: u32)
        -> Result<(), PipelineError>;

    /// Encode the scan dispatches. Input must already hold the counters.
    fn record(&self, encoder: &mut wgpu::CommandEncoder);

    /// Scan input buffer (write counters here, e.g. via buffer copy).
    fn input(&self) -> &wgpu::Buffer;

    /// Scan output: `out[i] = sum(in[0..i])`, exclusive.
    fn output(&self) -> &wgpu::Buffer;
}

#[cfg(test)]
pub(crate) fn exclusive_scan_reference(input: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(input.len());
    let mut sum = 0u32;
    for &v in input {
        out.push(sum);
        sum += v;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_to_vec4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(4095), 4096);
        assert_eq!(align4(4096), 4096);
    }

    #[test]
    fn partition_math_covers_all_elements() {
        assert_eq!(partition_count(0), 1);
        assert_eq!(partition_count(4), 1);
        assert_eq!(partition_count(PARTITION_SIZE), 1);
        assert_eq!(partition_count(PARTITION_SIZE + 4), 2);
        assert_eq!(partition_count(MAX_SCAN_SIZE), MAX_SCAN_SIZE / PARTITION_SIZE);
    }

    #[test]
    fn capacity_ceiling_is_enforced() {
        assert!(check_capacity(MAX_SCAN_SIZE).is_ok());
        assert!(matches!(
            check_capacity(MAX_SCAN_SIZE + 1),
            Err(PipelineError::CapacityExceeded {
                requested,
                max
            }) if requested == (MAX_SCAN_SIZE + 1) as u64 && max == MAX_SCAN_SIZE as u64
        ));
    }

    #[test]
    fn reference_scan_is_exclusive() {
        assert_eq!(exclusive_scan_reference(&[]), Vec::<u32>::new());
        assert_eq!(exclusive_scan_reference(&[5]), vec![0]);
        assert_eq!(exclusive_scan_reference(&[1, 2, 3, 4]), vec![0, 1, 3, 6]);
    }
}
