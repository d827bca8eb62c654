//! Interface identifiers.

use std::fmt;
use std::str::FromStr;

/// 128-bit interface identifier in the native `GUID` layout
///
/// The in-memory layout matches the Windows `GUID` struct exactly so a
/// `*const Guid` can be read straight out of a `QueryInterface` call.
///
/// ## Example
///
/// ```rust
/// use soshost_core::com::Guid;
///
/// const IID: Guid = Guid::from_u128(0x3e11ccee_d08b_43e5_af01_32717a64da03);
/// assert_eq!(IID.to_string(), "3E11CCEE-D08B-43E5-AF01-32717A64DA03");
/// assert_eq!("3e11ccee-d08b-43e5-af01-32717a64da03".parse::<Guid>().unwrap(), IID);
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid
{
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid
{
    /// The all-zero GUID
    pub const ZERO: Self = Guid::from_u128(0);

    /// Build a GUID from its canonical big-endian 128-bit spelling
    pub const fn from_u128(value: u128) -> Self
    {
        Self {
            data1: (value >> 96) as u32,
            data2: ((value >> 80) & 0xffff) as u16,
            data3: ((value >> 64) & 0xffff) as u16,
            data4: (value as u64).to_be_bytes(),
        }
    }

    /// Inverse of [`Guid::from_u128`]
    pub const fn to_u128(self) -> u128
    {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }
}

impl fmt::Display for Guid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let tail = u64::from_be_bytes(self.data4);
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            self.data1,
            self.data2,
            self.data3,
            tail >> 48,
            tail & 0xffff_ffff_ffff
        )
    }
}

impl FromStr for Guid
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
        let groups: Vec<&str> = trimmed.split('-').collect();
        let widths = [8, 4, 4, 4, 12];
        if groups.len() != widths.len() || groups.iter().zip(widths).any(|(g, w)| g.len() != w) {
            return Err(format!("Invalid GUID: {s}"));
        }
        let hex: String = groups.concat();
        u128::from_str_radix(&hex, 16)
            .map(Guid::from_u128)
            .map_err(|_| format!("Invalid GUID: {s}"))
    }
}
