//! HRESULT-style status codes.

use std::fmt;

/// 32-bit status code returned by every vtable slot
///
/// Zero and positive values are success, negative values are failures. The
/// constants cover the codes this host ever produces.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult
{
    pub const S_OK: Self = HResult(0);
    pub const S_FALSE: Self = HResult(1);
    pub const E_NOTIMPL: Self = HResult(0x8000_4001_u32 as i32);
    pub const E_NOINTERFACE: Self = HResult(0x8000_4002_u32 as i32);
    pub const E_FAIL: Self = HResult(0x8000_4005_u32 as i32);
    pub const E_UNEXPECTED: Self = HResult(0x8000_FFFF_u32 as i32);
    pub const E_INVALIDARG: Self = HResult(0x8007_0057_u32 as i32);
    /// `HRESULT_FROM_WIN32(ERROR_INSUFFICIENT_BUFFER)`
    pub const E_INSUFFICIENT_BUFFER: Self = HResult(0x8007_007A_u32 as i32);

    pub const fn is_ok(self) -> bool
    {
        self.0 >= 0
    }

    pub const fn is_err(self) -> bool
    {
        self.0 < 0
    }

    /// Raw bits, as printed by native tooling
    pub const fn code(self) -> u32
    {
        self.0 as u32
    }

    /// Convert to a `Result`, keeping the failing code as the error
    pub fn ok(self) -> Result<(), HResult>
    {
        if self.is_ok() { Ok(()) } else { Err(self) }
    }
}

impl From<bool> for HResult
{
    fn from(success: bool) -> Self
    {
        if success { HResult::S_OK } else { HResult::E_FAIL }
    }
}

impl fmt::Display for HResult
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08X}", self.code())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_hresult_success_classes()
    {
        assert!(HResult::S_OK.is_ok());
        assert!(HResult::S_FALSE.is_ok());
        assert!(HResult::E_FAIL.is_err());
        assert_eq!(HResult::E_INSUFFICIENT_BUFFER.code(), 0x8007_007A);
        assert_eq!(HResult::E_NOINTERFACE.to_string(), "0x80004002");
        assert_eq!(HResult::E_NOTIMPL.ok(), Err(HResult::E_NOTIMPL));
    }
}
