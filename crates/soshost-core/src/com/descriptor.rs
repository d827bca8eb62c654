//! Interface descriptions used to validate vtable layouts.
//!
//! A descriptor is the flat, ordered slot list of one interface: the slots of
//! its base interface (recursively) followed by its own. `IUnknown`'s three
//! slots are implicit and never listed.

use super::Guid;

/// Number of `IUnknown` slots every vtable starts with
pub const IUNKNOWN_SLOTS: usize = 3;

/// Static description of one COM interface
///
/// Produced by [`declare_interface!`](crate::declare_interface). The
/// descriptor is only consulted when a builder is created with `validate`
/// set, and for the IID lookup.
#[derive(Debug)]
pub struct InterfaceDescriptor
{
    /// Interface name, for diagnostics
    pub name: &'static str,
    /// Interface identifier
    pub iid: Guid,
    /// Interface this one derives from, `None` when it derives directly from `IUnknown`
    pub base: Option<&'static InterfaceDescriptor>,
    /// Slots this interface adds after its base
    pub methods: &'static [&'static str],
}

impl InterfaceDescriptor
{
    /// Slots after `IUnknown`, base slots included
    pub fn slot_count(&self) -> usize
    {
        self.base.map_or(0, InterfaceDescriptor::slot_count) + self.methods.len()
    }

    /// Total vtable length including the `IUnknown` prefix
    pub fn vtable_len(&self) -> usize
    {
        IUNKNOWN_SLOTS + self.slot_count()
    }

    /// Flattened slot names after `IUnknown`, in native order
    pub fn slot_names(&self) -> Vec<&'static str>
    {
        let mut names = self.base.map(InterfaceDescriptor::slot_names).unwrap_or_default();
        names.extend_from_slice(self.methods);
        names
    }

    /// Position of `method` in the flattened slot list (after `IUnknown`)
    pub fn slot_index(&self, method: &str) -> Option<usize>
    {
        self.slot_names().iter().position(|name| *name == method)
    }

    /// Whether `other` is this interface or one of its bases
    pub fn derives_from(&self, other: &InterfaceDescriptor) -> bool
    {
        if self.iid == other.iid {
            return true;
        }
        self.base.is_some_and(|base| base.derives_from(other))
    }
}

/// Declare a static [`InterfaceDescriptor`]
///
/// ```rust
/// use soshost_core::declare_interface;
///
/// declare_interface! {
///     /// Base interface
///     pub static IBASE: "IBase" = 0x00000000_0000_0000_0000_000000000001 {
///         First, Second,
///     }
/// }
/// declare_interface! {
///     pub static IDERIVED: "IDerived" = 0x00000000_0000_0000_0000_000000000002 : IBASE {
///         Third,
///     }
/// }
///
/// assert_eq!(IDERIVED.slot_count(), 3);
/// assert_eq!(IDERIVED.slot_index("Third"), Some(2));
/// ```
#[macro_export]
macro_rules! declare_interface {
    (
        $(#[$meta:meta])*
        $vis:vis static $name:ident : $label:literal = $iid:literal $(: $base:ident)? {
            $($method:ident),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis static $name: $crate::com::InterfaceDescriptor = $crate::com::InterfaceDescriptor {
            name: $label,
            iid: $crate::com::Guid::from_u128($iid),
            base: $crate::declare_interface!(@base $($base)?),
            methods: &[$(stringify!($method)),*],
        };
    };
    (@base) => { None };
    (@base $base:ident) => { Some(&$base) };
}

#[cfg(test)]
mod tests
{
    use super::*;

    crate::declare_interface! {
        static ROOT: "IRoot" = 0x10 { A, B }
    }
    crate::declare_interface! {
        static CHILD: "IChild" = 0x11 : ROOT { C }
    }
    crate::declare_interface! {
        static GRANDCHILD: "IGrandChild" = 0x12 : CHILD { D, E }
    }

    #[test]
    fn test_flattened_slots_repeat_bases_first()
    {
        assert_eq!(GRANDCHILD.slot_names(), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(GRANDCHILD.slot_count(), 5);
        assert_eq!(GRANDCHILD.vtable_len(), 8);
        assert_eq!(CHILD.slot_index("C"), Some(2));
        assert_eq!(CHILD.slot_index("D"), None);
    }

    #[test]
    fn test_derives_from()
    {
        assert!(GRANDCHILD.derives_from(&ROOT));
        assert!(CHILD.derives_from(&CHILD));
        assert!(!ROOT.derives_from(&CHILD));
    }
}
