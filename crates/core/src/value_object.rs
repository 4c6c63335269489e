//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; two
/// with the same values are the same value. `ContactInfo` and `InvoiceTotals`
/// are value objects; `Client` and `Invoice` are entities.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
