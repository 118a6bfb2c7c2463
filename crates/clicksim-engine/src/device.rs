//! Device residency of volumes.
//!
//! Every volume handed to the engine reports where its data lives via
//! [`Resident`]. The engine checks residency once at its boundary
//! ([`colocated`]) and allocates every output on that same device; no
//! component moves data between devices.

use std::fmt;

use ndarray::{ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

use crate::types::ClickError;

/// Compute device owning a volume's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host memory.
    Host,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
        }
    }
}

/// Capability of reporting the device a volume lives on.
pub trait Resident {
    /// The device owning this value's storage.
    fn device(&self) -> Device;
}

impl<S, D> Resident for ArrayBase<S, D>
where
    S: Data,
    D: Dimension,
{
    fn device(&self) -> Device {
        Device::Host
    }
}

/// Check that two volumes live on the same device and return it.
///
/// # Errors
///
/// Returns [`ClickError::DeviceMismatch`] if the devices differ.
pub fn colocated<A, B>(context: &'static str, left: &A, right: &B) -> Result<Device, ClickError>
where
    A: Resident + ?Sized,
    B: Resident + ?Sized,
{
    let (l, r) = (left.device(), right.device());
    if l == r {
        Ok(l)
    } else {
        Err(ClickError::DeviceMismatch {
            context,
            left: l,
            right: r,
        })
    }
}
