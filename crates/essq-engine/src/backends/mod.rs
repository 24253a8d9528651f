//! Built-in backends.

pub mod gaussian;
pub mod molpro;
pub mod orca;
pub mod qchem;

pub use gaussian::GaussianBackend;
pub use molpro::MolproBackend;
pub use orca::OrcaBackend;
pub use qchem::QchemBackend;

use essq_core::model::{JobType, Level};

/// Rounds `value` up to the next multiple of `step`.
pub(crate) fn round_up_to(value: f64, step: f64) -> f64 {
    (value / step).ceil() * step
}

/// `method/basis`, or just the method for basis-free composite methods.
pub(crate) fn method_and_basis(level: &Level, job_type: JobType) -> String {
    match (&level.basis, job_type) {
        (_, JobType::Composite) | (None, _) => level.method.clone(),
        (Some(basis), _) => format!("{}/{}", level.method, basis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_to() {
        assert_eq!(round_up_to(9718.0, 100.0), 9800.0);
        assert_eq!(round_up_to(9800.0, 100.0), 9800.0);
        assert_eq!(round_up_to(23.7, 100.0), 100.0);
    }

    #[test]
    fn test_composite_drops_basis() {
        let level = Level::new("CBS-QB3", Some("ignored"));
        assert_eq!(method_and_basis(&level, JobType::Composite), "cbs-qb3");
        assert_eq!(method_and_basis(&level, JobType::Sp), "cbs-qb3/ignored");
    }
}
