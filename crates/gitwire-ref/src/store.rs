use gitwire_hash::ObjectId;

use crate::error::RefError;
use crate::name::RefName;
use crate::Reference;

/// Trait for pluggable reference storage backends.
///
/// The negotiation drivers use this to advertise refs and to apply push
/// updates; iteration order must be lexicographic by full ref name so that
/// advertisements are deterministic.
pub trait RefStore: Send + Sync {
    /// Iterate all refs, sorted lexicographically by full ref name.
    fn iter_refs(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<Reference, RefError>> + '_>, RefError>;

    /// Resolve a ref name to its final OID, following symbolic ref chains.
    fn resolve(&self, name: &RefName) -> Result<Option<ObjectId>, RefError>;

    /// Create or update a direct ref with a compare-and-swap check:
    /// `old` is the expected current value (null OID = must not exist).
    fn set_ref(&self, name: &RefName, old: ObjectId, new: ObjectId) -> Result<(), RefError>;

    /// Delete a ref with a compare-and-swap check against `old`.
    fn remove_ref(&self, name: &RefName, old: ObjectId) -> Result<(), RefError>;
}
