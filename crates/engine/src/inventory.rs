use crate::scene::ObjectId;

pub const DEFAULT_INVENTORY_SLOTS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub object_id: ObjectId,
    pub name: String,
    pub icon: Option<String>,
}

/// Fixed number of slots holding what the agent carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    slots: Vec<Option<InventoryItem>>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(DEFAULT_INVENTORY_SLOTS)
    }
}

impl Inventory {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![None; slot_count],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn slot(&self, index: usize) -> Option<&InventoryItem> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Returns `false` if `index` is out of range.
    pub fn set_slot(&mut self, index: usize, item: Option<InventoryItem>) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    pub fn empty_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn find_object_slot(&self, object_id: ObjectId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|item| item.object_id == object_id)
        })
    }

    pub fn items(&self) -> impl Iterator<Item = &InventoryItem> + '_ {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u32) -> Option<InventoryItem> {
        Some(InventoryItem {
            object_id: ObjectId(id),
            name: format!("object {id}"),
            icon: None,
        })
    }

    #[test]
    fn fills_first_empty_slot() {
        let mut inventory = Inventory::new(2);
        assert_eq!(inventory.empty_slot(), Some(0));
        assert!(inventory.set_slot(0, item(7)));
        assert_eq!(inventory.empty_slot(), Some(1));
        assert!(inventory.set_slot(1, item(8)));
        assert_eq!(inventory.empty_slot(), None);
        assert_eq!(inventory.find_object_slot(ObjectId(8)), Some(1));
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut inventory = Inventory::default();
        assert_eq!(inventory.capacity(), 1);
        assert!(!inventory.set_slot(3, item(1)));
    }

    #[test]
    fn reset_clears_every_slot() {
        let mut inventory = Inventory::new(3);
        inventory.set_slot(2, item(5));
        inventory.reset();
        assert_eq!(inventory.items().count(), 0);
        assert_eq!(inventory.capacity(), 3);
    }
}
