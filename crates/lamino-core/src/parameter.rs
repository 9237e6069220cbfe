//! Parameter<T> - named, validated, observable values
//!
//! Scan settings (number of projections, angular range, velocities...) are
//! kept as `Parameter`s so a sequencer can validate them on write and a
//! front end can watch them change.
//!
//! ```rust,ignore
//! let range = Parameter::new("angular_range", 360.0)
//!     .with_unit("deg")
//!     .with_range(0.0, 3600.0);
//!
//! let mut rx = range.subscribe();
//! range.set(180.0)?;
//! assert_eq!(*rx.borrow_and_update(), 180.0);
//! ```

use anyhow::{anyhow, Result};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;

type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Typed parameter backed by a watch channel.
#[derive(Clone)]
pub struct Parameter<T>
where
    T: Clone + Send + Sync + 'static,
{
    name: String,
    unit: Option<String>,
    description: Option<String>,
    sender: Arc<watch::Sender<T>>,
    validator: Option<Validator<T>>,
}

impl<T> Parameter<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    /// Create a parameter with an initial value.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            name: name.into(),
            unit: None,
            description: None,
            sender: Arc::new(sender),
            validator: None,
        }
    }

    /// Attach a unit label.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Reject values outside `[min, max]`.
    pub fn with_range(self, min: T, max: T) -> Self
    where
        T: PartialOrd,
    {
        let name = self.name.clone();
        self.with_validator(move |value| {
            if min <= *value && *value <= max {
                Ok(())
            } else {
                Err(anyhow!(
                    "Parameter '{}': {:?} outside [{:?}, {:?}]",
                    name,
                    value,
                    min,
                    max
                ))
            }
        })
    }

    /// Add a custom validator, checked before every write.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&T) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Validate and store a new value, notifying subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        if let Some(validator) = &self.validator {
            validator(&value)?;
        }
        tracing::debug!(parameter = %self.name, value = ?value, "parameter set");
        self.sender.send_replace(value);
        Ok(())
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit label, if any.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl<T> Debug for Parameter<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value", &*self.sender.borrow())
            .field("unit", &self.unit)
            .finish()
    }
}
