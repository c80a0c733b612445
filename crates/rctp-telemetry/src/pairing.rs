/// Single-slot cache holding the latest sensor readings until the next image
/// arrives. Taking from the slot always empties it, so one set of readings is
/// never attached to two images.

use crate::sensor::Readings;

#[derive(Debug, Default)]
pub struct SensorSlot {
    readings: Option<Readings>,
}

impl SensorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache `readings`, returning whatever unpaired readings they replace.
    pub fn store(&mut self, readings: Readings) -> Option<Readings> {
        self.readings.replace(readings)
    }

    /// Take the cached readings and clear the slot.
    pub fn take(&mut self) -> Option<Readings> {
        self.readings.take()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_none()
    }

    pub fn peek(&self) -> Option<&Readings> {
        self.readings.as_ref()
    }
}
