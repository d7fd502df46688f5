//! Provides the [`U16ReprEnum`] trait, which is made to be implemented by enums that can be
//! converted into or parsed from an [`u16`] value, for easy serialization and deserialization.

/// Allows a type to be converted into or parsed from an [`u16`] representation.
pub trait U16ReprEnum: Sized + Copy {
    /// Parses an `u16` into the enum variant it represents. If the `u16` represents a variant in
    /// this enum, then `Some` is returned with said variant. Otherwise, `None` is returned.
    fn from_u16(value: u16) -> Option<Self>;

    /// Converts this enum into its `u16` representation.
    fn into_u16(self) -> u16;
}
