//! Dynamic transformations: user-supplied logic behind an opaque capability.
//! A closure receives the work context and may read and write files, edit
//! labels (hidden ones included), consult the change batches, and re-enter
//! other transformations; the shared progress counters live on the context so
//! nested invocations keep one numbering.

use crate::errors::RelayError;
use crate::transform::{TransformStatus, Transformation};
use crate::work::TransformWork;

/// The capability a user closure implements. Implementations live outside
/// the core; errors they raise are surfaced as validation failures.
pub trait DynamicTransform {
    fn apply(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError>;

    fn name(&self) -> String {
        "dynamic transform".to_string()
    }
}

/// A named function used as a dynamic transformation.
pub struct FnTransform<F>
where
    F: Fn(&mut TransformWork) -> Result<TransformStatus, RelayError>,
{
    name: String,
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&mut TransformWork) -> Result<TransformStatus, RelayError>,
{
    pub fn new(name: impl Into<String>, f: F) -> FnTransform<F> {
        FnTransform {
            name: name.into(),
            f,
        }
    }
}

impl<F> std::fmt::Debug for FnTransform<F>
where
    F: Fn(&mut TransformWork) -> Result<TransformStatus, RelayError>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform").field("name", &self.name).finish()
    }
}

impl<F> DynamicTransform for FnTransform<F>
where
    F: Fn(&mut TransformWork) -> Result<TransformStatus, RelayError>,
{
    fn apply(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        (self.f)(work)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl<F> Transformation for FnTransform<F>
where
    F: Fn(&mut TransformWork) -> Result<TransformStatus, RelayError>,
{
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        self.apply(work).map_err(|e| match e {
            // Intentional control flow passes through; anything else from
            // user logic is a validation failure of this transform.
            RelayError::EmptyChange(_) | RelayError::Validation(_) | RelayError::VoidOperation(_) => e,
            other => RelayError::validation(format!("error in '{}': {other}", self.name)),
        })
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
