use crate::key::{Interner, KeyId};
use smallvec::SmallVec;

/// Interned tag pairs, kept sorted by key so equal sets hash equally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Series rarely carry more than a handful of tags.
    tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    pub fn resolve(interner: &Interner, tags: &[(&str, &str)]) -> Self {
        let mut resolved: SmallVec<[(KeyId, KeyId); 4]> = tags
            .iter()
            .map(|(k, v)| (interner.get_or_intern(k), interner.get_or_intern(v)))
            .collect();
        resolved.sort_by_key(|(k, _)| *k);
        // Last write wins for repeated keys.
        resolved.dedup_by(|later, earlier| {
            if later.0 == earlier.0 {
                earlier.1 = later.1;
                true
            } else {
                false
            }
        });
        Self { tags: resolved }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let slice: &[(KeyId, KeyId)] = &self.tags;
        let idx = slice.partition_point(|(k, _)| *k < key);
        slice.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }

    pub fn to_strings(&self, interner: &Interner) -> Vec<(String, String)> {
        self.tags
            .iter()
            .map(|(k, v)| {
                (
                    interner.resolve(*k).map(|s| s.to_string()).unwrap_or_default(),
                    interner.resolve(*v).map(|s| s.to_string()).unwrap_or_default(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_sorts_and_dedups() {
        let interner = Interner::new();
        let a = TagSet::resolve(&interner, &[("scenario", "ingest"), ("check", "status")]);
        let b = TagSet::resolve(&interner, &[("check", "status"), ("scenario", "ingest")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);

        let dup = TagSet::resolve(&interner, &[("scenario", "a"), ("scenario", "b")]);
        assert_eq!(dup.len(), 1);
        let key = interner.get_or_intern("scenario");
        assert_eq!(dup.get(key), Some(interner.get_or_intern("b")));
    }

    #[test]
    fn to_strings_round_trips_through_interner() {
        let interner = Interner::new();
        let set = TagSet::resolve(&interner, &[("scenario", "query")]);
        assert_eq!(
            set.to_strings(&interner),
            vec![("scenario".to_string(), "query".to_string())]
        );
        assert!(TagSet::default().is_empty());
    }
}
