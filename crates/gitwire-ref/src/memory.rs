use std::collections::BTreeMap;
use std::sync::RwLock;

use gitwire_hash::ObjectId;

use crate::error::RefError;
use crate::name::RefName;
use crate::store::RefStore;
use crate::Reference;

/// An in-memory ref store.
///
/// Backs driver tests and embedders that serve a ref set assembled at
/// runtime. Refs are kept in a sorted map, so iteration is lexicographic.
#[derive(Debug, Default)]
pub struct MemoryRefStore {
    refs: RwLock<BTreeMap<RefName, Target>>,
}

#[derive(Debug, Clone)]
enum Target {
    Direct(ObjectId),
    Symbolic(RefName),
}

impl MemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a direct ref without a CAS check.
    pub fn insert(&self, name: RefName, target: ObjectId) {
        self.refs.write().unwrap().insert(name, Target::Direct(target));
    }

    /// Insert or overwrite a symbolic ref without a CAS check.
    pub fn insert_symbolic(&self, name: RefName, target: RefName) {
        self.refs
            .write()
            .unwrap()
            .insert(name, Target::Symbolic(target));
    }

    fn current_oid(
        refs: &BTreeMap<RefName, Target>,
        name: &RefName,
    ) -> Result<Option<ObjectId>, RefError> {
        let mut seen = 0;
        let mut cursor = name.clone();
        loop {
            match refs.get(&cursor) {
                None => return Ok(None),
                Some(Target::Direct(oid)) => return Ok(Some(*oid)),
                Some(Target::Symbolic(next)) => {
                    seen += 1;
                    if seen > 16 {
                        return Err(RefError::NotFound(name.to_string()));
                    }
                    cursor = next.clone();
                }
            }
        }
    }
}

impl RefStore for MemoryRefStore {
    fn iter_refs(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<Reference, RefError>> + '_>, RefError> {
        let snapshot: Vec<Reference> = self
            .refs
            .read()
            .unwrap()
            .iter()
            .map(|(name, target)| match target {
                Target::Direct(oid) => Reference::Direct {
                    name: name.clone(),
                    target: *oid,
                },
                Target::Symbolic(t) => Reference::Symbolic {
                    name: name.clone(),
                    target: t.clone(),
                },
            })
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn resolve(&self, name: &RefName) -> Result<Option<ObjectId>, RefError> {
        let refs = self.refs.read().unwrap();
        Self::current_oid(&refs, name)
    }

    fn set_ref(&self, name: &RefName, old: ObjectId, new: ObjectId) -> Result<(), RefError> {
        let mut refs = self.refs.write().unwrap();
        let actual = Self::current_oid(&refs, name)?.unwrap_or(old.algorithm().null_oid());
        if actual != old {
            return Err(RefError::CasFailed {
                name: name.to_string(),
                expected: old,
                actual,
            });
        }
        refs.insert(name.clone(), Target::Direct(new));
        Ok(())
    }

    fn remove_ref(&self, name: &RefName, old: ObjectId) -> Result<(), RefError> {
        let mut refs = self.refs.write().unwrap();
        let actual = Self::current_oid(&refs, name)?.unwrap_or(old.algorithm().null_oid());
        if actual != old {
            return Err(RefError::CasFailed {
                name: name.to_string(),
                expected: old,
                actual,
            });
        }
        refs.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(hex_char: char) -> ObjectId {
        ObjectId::from_hex(&hex_char.to_string().repeat(40)).unwrap()
    }

    #[test]
    fn insert_and_resolve() {
        let store = MemoryRefStore::new();
        let main = RefName::new("refs/heads/main").unwrap();
        store.insert(main.clone(), oid('a'));
        assert_eq!(store.resolve(&main).unwrap(), Some(oid('a')));
    }

    #[test]
    fn symbolic_resolution() {
        let store = MemoryRefStore::new();
        let head = RefName::new("HEAD").unwrap();
        let main = RefName::new("refs/heads/main").unwrap();
        store.insert(main.clone(), oid('b'));
        store.insert_symbolic(head.clone(), main);
        assert_eq!(store.resolve(&head).unwrap(), Some(oid('b')));
    }

    #[test]
    fn cas_rejects_stale_update() {
        let store = MemoryRefStore::new();
        let main = RefName::new("refs/heads/main").unwrap();
        store.insert(main.clone(), oid('a'));
        let err = store.set_ref(&main, oid('b'), oid('c')).unwrap_err();
        assert!(matches!(err, RefError::CasFailed { .. }));
    }

    #[test]
    fn create_requires_null_old() {
        let store = MemoryRefStore::new();
        let topic = RefName::new("refs/heads/topic").unwrap();
        store
            .set_ref(&topic, ObjectId::NULL_SHA1, oid('d'))
            .unwrap();
        assert_eq!(store.resolve(&topic).unwrap(), Some(oid('d')));
    }

    #[test]
    fn delete_with_cas() {
        let store = MemoryRefStore::new();
        let main = RefName::new("refs/heads/main").unwrap();
        store.insert(main.clone(), oid('a'));
        store.remove_ref(&main, oid('a')).unwrap();
        assert_eq!(store.resolve(&main).unwrap(), None);
    }

    #[test]
    fn iteration_is_sorted() {
        let store = MemoryRefStore::new();
        store.insert(RefName::new("refs/tags/v1").unwrap(), oid('1'));
        store.insert(RefName::new("refs/heads/main").unwrap(), oid('2'));
        let names: Vec<String> = store
            .iter_refs()
            .unwrap()
            .map(|r| r.unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["refs/heads/main", "refs/tags/v1"]);
    }
}
