//! Unit FIFO and the provider seam that turns a unit into steps.

use std::fmt;

use tracing::{info, warn};

use crate::core::types::{RawStep, UnitRef};
use crate::error::StepperError;

/// Source of step batches.
///
/// Called synchronously on the host loop when the previous batch is used up.
pub trait UnitProvider {
    fn invoke(&mut self, unit: &UnitRef) -> anyhow::Result<Vec<RawStep>>;
}

impl<F> UnitProvider for F
where
    F: FnMut(&UnitRef) -> anyhow::Result<Vec<RawStep>>,
{
    fn invoke(&mut self, unit: &UnitRef) -> anyhow::Result<Vec<RawStep>> {
        self(unit)
    }
}

/// Ordered units plus the index of the one being processed.
#[derive(Default)]
pub struct UnitLoader {
    units: Vec<UnitRef>,
    /// `None` before the first unit; may point one past the end once all
    /// units are used.
    index: Option<usize>,
    provider: Option<Box<dyn UnitProvider + Send>>,
}

impl UnitLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_provider(&mut self, provider: Box<dyn UnitProvider + Send>) {
        self.provider = Some(provider);
    }

    pub fn push(&mut self, unit: UnitRef) {
        self.units.push(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// True once a unit has been taken from the queue.
    pub fn started(&self) -> bool {
        self.index.is_some()
    }

    /// Unit being processed, if any.
    pub fn current(&self) -> Option<&UnitRef> {
        self.index.and_then(|index| self.units.get(index))
    }

    /// Number of units taken so far (never more than the number added).
    pub fn count(&self) -> usize {
        self.index.map_or(0, |index| (index + 1).min(self.units.len()))
    }

    /// Move to the next unit; `None` when the queue is used up.
    pub fn advance(&mut self) -> Option<UnitRef> {
        let next = self.index.map_or(0, |index| index + 1);
        self.index = Some(next.min(self.units.len()));
        self.units.get(next).cloned()
    }

    /// Ask the provider for the steps of `unit`.
    pub fn invoke(&mut self, unit: &UnitRef) -> Result<Vec<RawStep>, StepperError> {
        let Some(provider) = self.provider.as_mut() else {
            return Err(StepperError::Provider {
                unit: unit.clone(),
                message: "no unit provider configured".to_string(),
            });
        };
        info!(unit = %unit, "loading unit");
        provider.invoke(unit).map_err(|err| {
            warn!(unit = %unit, error = %format!("{err:#}"), "unit provider failed");
            StepperError::Provider {
                unit: unit.clone(),
                message: format!("{err:#}"),
            }
        })
    }
}

impl fmt::Debug for UnitLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitLoader")
            .field("units", &self.units)
            .field("index", &self.index)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn advance_walks_units_then_stops() {
        let mut loader = UnitLoader::new();
        loader.push(UnitRef::new("a"));
        loader.push(UnitRef::new("b"));
        assert_eq!(loader.count(), 0);
        assert_eq!(loader.current(), None);

        assert_eq!(loader.advance(), Some(UnitRef::new("a")));
        assert_eq!(loader.count(), 1);
        assert_eq!(loader.advance(), Some(UnitRef::new("b")));
        assert_eq!(loader.current(), Some(&UnitRef::new("b")));

        assert_eq!(loader.advance(), None);
        assert_eq!(loader.advance(), None);
        assert_eq!(loader.count(), 2);
        assert_eq!(loader.current(), None);
    }

    #[test]
    fn provider_errors_become_provider_errors() {
        let mut loader = UnitLoader::new();
        loader.set_provider(Box::new(|_: &UnitRef| -> anyhow::Result<Vec<RawStep>> {
            Err(anyhow!("disk on fire"))
        }));
        let err = loader
            .invoke(&UnitRef::new("u"))
            .expect_err("provider fails");
        assert_eq!(
            err,
            StepperError::Provider {
                unit: UnitRef::new("u"),
                message: "disk on fire".to_string(),
            }
        );
    }

    #[test]
    fn missing_provider_is_reported() {
        let mut loader = UnitLoader::new();
        let err = loader.invoke(&UnitRef::new("u")).expect_err("no provider");
        assert!(matches!(err, StepperError::Provider { .. }));
    }
}
