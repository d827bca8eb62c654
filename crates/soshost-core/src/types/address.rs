//! Target address type and sign-extension normalisation.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed target address
///
/// Native callers hand addresses around as raw `u64`. Wrapping them keeps
/// addresses apart from sizes and counts once they are inside the host.
///
/// ## Sign extension
///
/// A 32-bit plugin build (or a DAC reading a 32-bit target) may pass
/// pointer-sized values that were sign extended to 64 bits, e.g.
/// `0xFFFF_FFFF_8000_1000` for `0x8000_1000`. [`Address::masked`] clears
/// those bits with the target's sign-extension mask before the address is
/// used as a lookup key.
///
/// ## Example
///
/// ```rust
/// use soshost_core::types::Address;
///
/// let addr = Address::from(0xFFFF_FFFF_8000_1000);
/// assert_eq!(addr.masked(Address::sign_extension_mask(4)).value(), 0x8000_1000);
/// assert_eq!(addr.masked(Address::sign_extension_mask(8)), addr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// The canonical mask for a target with `pointer_size`-byte pointers
    ///
    /// 32-bit targets keep the low 32 bits, everything else keeps all 64.
    pub const fn sign_extension_mask(pointer_size: usize) -> u64
    {
        if pointer_size == 4 {
            u32::MAX as u64
        } else {
            u64::MAX
        }
    }

    /// Clear the bits outside `mask`
    #[must_use]
    pub const fn masked(self, mask: u64) -> Self
    {
        Address(self.0 & mask)
    }

    /// Add an offset to this address, checking for overflow
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Whether `self` lies in `[base, base + size)`
    pub fn is_within(self, base: Address, size: u64) -> bool
    {
        self.0 >= base.0 && self.0 - base.0 < size
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
