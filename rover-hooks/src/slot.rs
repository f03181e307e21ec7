/// Stable handle into a [`SlotMap`].
///
/// The generation is bumped every time a slot is freed, so a key that
/// outlived its value never resolves to whatever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Arena-based storage with free-list slot recycling
pub struct SlotMap<T> {
    values: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
}

impl<T> SlotMap<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Store a value, reusing a recycled slot when one is available
    pub fn insert(&mut self, value: T) -> SlotKey {
        if let Some(index) = self.free_list.pop() {
            self.values[index as usize] = Some(value);
            SlotKey {
                index,
                generation: self.generations[index as usize],
            }
        } else {
            let index = self.values.len() as u32;
            self.values.push(Some(value));
            self.generations.push(0);
            SlotKey {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, key: SlotKey) -> Option<&T> {
        if !self.is_current(key) {
            return None;
        }
        self.values[key.index as usize].as_ref()
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        if !self.is_current(key) {
            return None;
        }
        self.values[key.index as usize].as_mut()
    }

    /// Free a slot, returning its value. Stale keys are ignored.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        if !self.is_current(key) {
            return None;
        }
        let idx = key.index as usize;
        let value = self.values[idx].take()?;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_list.push(key.index);
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> + '_ {
        self.values
            .iter()
            .zip(self.generations.iter())
            .enumerate()
            .filter_map(|(index, (value, generation))| {
                value.as_ref().map(|v| {
                    (
                        SlotKey {
                            index: index as u32,
                            generation: *generation,
                        },
                        v,
                    )
                })
            })
    }

    pub fn keys(&self) -> Vec<SlotKey> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// Get the total number of allocated slots (including freed ones)
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Get the number of occupied slots
    pub fn len(&self) -> usize {
        self.values.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_current(&self, key: SlotKey) -> bool {
        self.generations
            .get(key.index as usize)
            .is_some_and(|generation| *generation == key.generation)
    }
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut slots = SlotMap::new();
        let key = slots.insert("first");

        assert_eq!(slots.get(key), Some(&"first"));
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn test_remove_invalidates_key() {
        let mut slots = SlotMap::new();
        let key = slots.insert(1);

        assert_eq!(slots.remove(key), Some(1));
        assert!(slots.get(key).is_none());
        assert!(slots.remove(key).is_none());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let mut slots = SlotMap::new();
        let old = slots.insert(1);
        slots.remove(old);

        let new = slots.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        // The stale key must not see the new occupant
        assert!(slots.get(old).is_none());
        assert_eq!(slots.get(new), Some(&2));
        assert_eq!(slots.capacity(), 1);
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut slots = SlotMap::new();
        let a = slots.insert('a');
        let b = slots.insert('b');
        let c = slots.insert('c');
        slots.remove(b);

        let keys = slots.keys();
        assert_eq!(keys, vec![a, c]);
    }
}
