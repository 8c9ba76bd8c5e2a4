//! Kernel metadata implementations.
use green_kernels::laplace_3d::Laplace3dKernel;
use rlst::RlstScalar;

use crate::traits::kernel::{KernelMetadata, KernelSymmetry};

impl<T> KernelMetadata for Laplace3dKernel<T>
where
    T: RlstScalar,
    Self: green_kernels::traits::Kernel<T = T> + Send + Sync,
{
    fn signature(&self) -> String {
        "laplace_3d".to_string()
    }

    fn homogeneity(&self) -> Option<i32> {
        Some(-1)
    }

    fn symmetry(&self) -> KernelSymmetry {
        KernelSymmetry::Radial
    }
}
