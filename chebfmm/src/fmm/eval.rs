//! Upward and downward pass control flow.
use std::time::Instant;

use bytemuck::Pod;
use num::Float;
use rlst::RlstScalar;

use crate::fmm::types::ChebFmm;
use crate::traits::fmm::{Evaluate, InteractionExecutor, SourceTranslation, TargetTranslation};
use crate::traits::kernel::KernelMetadata;
use crate::traits::types::{FmmError, FmmOperatorTime, FmmOperatorType, InteractionCategory};

impl<Scalar, Kern> ChebFmm<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    fn instrument<F>(&mut self, operator: FmmOperatorType, step: F) -> Result<(), FmmError>
    where
        F: FnOnce(&mut Self) -> Result<(), FmmError>,
    {
        if !self.timed {
            return step(self);
        }
        let start = Instant::now();
        step(self)?;
        self.operator_times
            .push(FmmOperatorTime::from_duration(operator, start.elapsed()));
        Ok(())
    }

    fn run_interactions(
        &mut self,
        category: InteractionCategory,
        level: u32,
    ) -> Result<(), FmmError> {
        let Some(descriptor) = self.descriptors.get(&(category, level)).cloned() else {
            return Ok(());
        };
        let backend = self.backend;
        let operator = match category {
            InteractionCategory::NearField => FmmOperatorType::NearField(level),
            InteractionCategory::SameLevel => FmmOperatorType::SameLevel(level),
            InteractionCategory::Upward => FmmOperatorType::Upward(level),
            InteractionCategory::Downward => FmmOperatorType::Downward(level),
        };
        self.instrument(operator, |fmm| fmm.execute(&descriptor, backend))
    }
}

impl<Scalar, Kern> Evaluate for ChebFmm<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    /// One full evaluation: zero the scratch buffers, run the upward pass,
    /// translate level by level downward, and write output coefficients
    /// into the tree. All operator metadata was fixed at build time, so
    /// repeated calls on unchanged input produce identical output.
    fn evaluate(&mut self) -> Result<(), FmmError> {
        self.locals.fill(Scalar::zero());
        self.direct.fill(Scalar::zero());
        self.operator_times.clear();
        let depth = self.tree.depth;

        self.instrument(FmmOperatorType::InitMultipole, |fmm| fmm.init_multipoles())?;
        for level in (1..=depth).rev() {
            self.instrument(FmmOperatorType::M2M(level), |fmm| fmm.m2m(level))?;
        }

        for level in 2..=depth {
            if level > 2 {
                self.instrument(FmmOperatorType::L2L(level), |fmm| fmm.l2l(level))?;
            }
            self.run_interactions(InteractionCategory::SameLevel, level)?;
            self.run_interactions(InteractionCategory::Downward, level)?;
        }
        for level in 1..=depth {
            self.run_interactions(InteractionCategory::NearField, level)?;
            self.run_interactions(InteractionCategory::Upward, level)?;
        }

        self.instrument(FmmOperatorType::LeafOutput, |fmm| fmm.evaluate_leaf_output())
    }
}
