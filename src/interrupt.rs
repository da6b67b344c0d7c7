//! GPIO interrupt line handling
//!
//! The DMP raises a falling edge on a GPIO pin once per FIFO batch. The
//! acquisition thread sits in [`InterruptSource::wait`] with a timeout so
//! shutdown requests are noticed even when the device stops producing edges.
//!
//! The production implementation uses the sysfs GPIO interface: export the
//! pin, direction in, falling edge, then poll the value file.

use linux_embedded_hal::sysfs_gpio::{Direction, Edge, Pin, PinPoller};

use crate::{Error, Result};

/// Outcome of one wait on the interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptEvent {
    /// The configured edge fired
    Edge,
    /// The timeout elapsed with no edge
    Timeout,
}

/// A pollable interrupt line
pub trait InterruptSource: Send {
    /// Block until an edge fires or `timeout_ms` elapses
    fn wait(&mut self, timeout_ms: isize) -> Result<InterruptEvent>;
}

/// Sysfs GPIO implementation of [`InterruptSource`]
pub struct SysfsInterruptPin {
    pin: Pin,
    poller: PinPoller,
}

impl SysfsInterruptPin {
    /// Export and configure a GPIO pin for falling-edge interrupts
    ///
    /// # Errors
    /// Returns [`Error::Interrupt`] if the pin cannot be exported or
    /// configured (typically missing permissions or an invalid pin number).
    pub fn open(gpio: u64) -> Result<Self> {
        let pin = Pin::new(gpio);
        pin.export().map_err(wrap)?;
        pin.set_direction(Direction::In).map_err(wrap)?;
        pin.set_edge(Edge::FallingEdge).map_err(wrap)?;
        let poller = pin.get_poller().map_err(wrap)?;
        Ok(Self { pin, poller })
    }

    /// The underlying sysfs pin
    pub fn pin(&self) -> Pin {
        self.pin
    }
}

impl InterruptSource for SysfsInterruptPin {
    fn wait(&mut self, timeout_ms: isize) -> Result<InterruptEvent> {
        match self.poller.poll(timeout_ms).map_err(wrap)? {
            Some(_) => Ok(InterruptEvent::Edge),
            None => Ok(InterruptEvent::Timeout),
        }
    }
}

fn wrap(e: linux_embedded_hal::sysfs_gpio::Error) -> Error {
    Error::Interrupt(Box::new(e))
}
