use std::{collections::BTreeMap, sync::Mutex};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A concurrent map of successfully synchronized images.
///
/// Maps a source reference string to the destination reference strings it
/// was copied to, in insertion order and without duplicates. Appended to by
/// workers during a run and serialized once at the end.
#[derive(Debug, Default)]
pub struct ImageList {
    content: Mutex<BTreeMap<String, Vec<String>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageList {
    /// Creates an empty image list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `src` was synchronized to `dst`. Duplicate destinations
    /// for the same source are ignored.
    pub fn add(&self, src: impl Into<String>, dst: impl Into<String>) {
        let (src, dst) = (src.into(), dst.into());
        let mut content = self.content.lock().unwrap();
        let destinations = content.entry(src).or_default();
        if !destinations.iter().any(|d| d == &dst) {
            destinations.push(dst);
        }
    }

    /// Returns true when `src` has already been recorded as synchronized to
    /// `dst`.
    pub fn query(&self, src: &str, dst: &str) -> bool {
        self.content
            .lock()
            .unwrap()
            .get(src)
            .is_some_and(|destinations| destinations.iter().any(|d| d == dst))
    }

    /// Removes every destination recorded for `src`.
    pub fn delete(&self, src: &str) {
        self.content.lock().unwrap().remove(src);
    }

    /// Removes all recorded images.
    pub fn reset(&self) {
        self.content.lock().unwrap().clear();
    }

    /// Returns a copy of the current content.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.content.lock().unwrap().clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
