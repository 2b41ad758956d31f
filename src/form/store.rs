use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde_json::Value;

use super::controller::FormState;
use super::validation::Rule;

/// Stable identity of one field-array item. Reordering items reorders keys, it never
/// re-keys them, so per-item field state follows the item.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ItemKey(u64);

impl ItemKey {
    pub const fn get(self) -> u64 {
        self.0
    }

    fn parse(segment: &str) -> Option<Self> {
        segment.strip_prefix('#')?.parse().ok().map(Self)
    }
}

impl Display for ItemKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct FieldConfig {
    pub rules: Vec<Rule>,
    pub keep_active: bool,
    pub keep_state: bool,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            keep_active: false,
            keep_state: true,
        }
    }
}

impl FieldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn keep_active(mut self, value: bool) -> Self {
        self.keep_active = value;
        self
    }

    pub fn keep_state(mut self, value: bool) -> Self {
        self.keep_state = value;
        self
    }
}

pub type FieldArrayConfig = FieldConfig;

/// `dirty` is always derived from the value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldPatch {
    pub value: Option<Option<Value>>,
    pub error: Option<String>,
    pub touched: Option<bool>,
    pub active: Option<bool>,
}

impl FieldPatch {
    pub fn value(mut self, value: impl Into<Option<Value>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn touched(mut self, touched: bool) -> Self {
        self.touched = Some(touched);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }
}

/// `dirty` follows the item sequence and the fields below the array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldArrayPatch {
    pub error: Option<String>,
    pub touched: Option<bool>,
    pub active: Option<bool>,
}

impl FieldArrayPatch {
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn touched(mut self, touched: bool) -> Self {
        self.touched = Some(touched);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSnapshot {
    pub name: String,
    pub value: Option<Value>,
    pub start_value: Option<Value>,
    pub error: String,
    pub active: bool,
    pub touched: bool,
    pub dirty: bool,
    pub validating: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldArraySnapshot {
    pub name: String,
    pub items: Vec<ItemKey>,
    pub start_items: Vec<ItemKey>,
    pub error: String,
    pub active: bool,
    pub touched: bool,
    pub dirty: bool,
    pub validating: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(super) struct ValidationSlot {
    pub(super) ticket: u64,
    pub(super) in_flight: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum EntryKind {
    Field,
    FieldArray,
}

#[derive(Clone, Debug)]
pub(super) struct FieldRecord {
    pub(super) seq: u64,
    pub(super) value: Option<Value>,
    pub(super) start_value: Option<Value>,
    pub(super) error: String,
    pub(super) active: bool,
    pub(super) touched: bool,
    pub(super) dirty: bool,
    pub(super) config: FieldConfig,
    pub(super) slot: ValidationSlot,
}

impl FieldRecord {
    pub(super) fn new(seq: u64, start_value: Option<Value>, active: bool) -> Self {
        Self {
            seq,
            value: start_value.clone(),
            start_value,
            error: String::new(),
            active,
            touched: false,
            dirty: false,
            config: FieldConfig::default(),
            slot: ValidationSlot::default(),
        }
    }

    pub(super) fn refresh_dirty(&mut self) {
        self.dirty = self.value != self.start_value;
    }

    pub(super) fn snapshot(&self, name: String) -> FieldSnapshot {
        FieldSnapshot {
            name,
            value: self.value.clone(),
            start_value: self.start_value.clone(),
            error: self.error.clone(),
            active: self.active,
            touched: self.touched,
            dirty: self.dirty,
            validating: self.slot.in_flight > 0,
        }
    }
}

#[derive(Clone, Debug)]
pub(super) struct FieldArrayRecord {
    pub(super) seq: u64,
    pub(super) items: Vec<ItemKey>,
    pub(super) start_items: Vec<ItemKey>,
    pub(super) error: String,
    pub(super) active: bool,
    pub(super) touched: bool,
    pub(super) dirty: bool,
    pub(super) config: FieldArrayConfig,
    pub(super) slot: ValidationSlot,
}

impl FieldArrayRecord {
    pub(super) fn new(seq: u64) -> Self {
        Self {
            seq,
            items: Vec::new(),
            start_items: Vec::new(),
            error: String::new(),
            active: true,
            touched: false,
            dirty: false,
            config: FieldArrayConfig::default(),
            slot: ValidationSlot::default(),
        }
    }

    pub(super) fn snapshot(&self, name: String) -> FieldArraySnapshot {
        FieldArraySnapshot {
            name,
            items: self.items.clone(),
            start_items: self.start_items.clone(),
            error: self.error.clone(),
            active: self.active,
            touched: self.touched,
            dirty: self.dirty,
            validating: self.slot.in_flight > 0,
        }
    }
}

pub(super) trait StoreEntry {
    fn seq(&self) -> u64;
    fn is_active(&self) -> bool;
    fn is_touched(&self) -> bool;
    fn is_dirty(&self) -> bool;
    fn error(&self) -> &str;
    fn set_error(&mut self, error: String);
    fn rules(&self) -> &[Rule];
    fn slot_mut(&mut self) -> &mut ValidationSlot;
}

macro_rules! impl_store_entry {
    ($record:ty) => {
        impl StoreEntry for $record {
            fn seq(&self) -> u64 {
                self.seq
            }

            fn is_active(&self) -> bool {
                self.active
            }

            fn is_touched(&self) -> bool {
                self.touched
            }

            fn is_dirty(&self) -> bool {
                self.dirty
            }

            fn error(&self) -> &str {
                &self.error
            }

            fn set_error(&mut self, error: String) {
                self.error = error;
            }

            fn rules(&self) -> &[Rule] {
                &self.config.rules
            }

            fn slot_mut(&mut self) -> &mut ValidationSlot {
                &mut self.slot
            }
        }
    };
}

impl_store_entry!(FieldRecord);
impl_store_entry!(FieldArrayRecord);

pub(super) fn is_within(name: &str, prefix: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn depth(name: &str) -> usize {
    name.split('.').count()
}

impl FormState {
    /// Maps a display name (`todos.2.title`) to the canonical store key
    /// (`todos.#7.title`). Index segments directly under a registered field array are
    /// swapped for the item key at that position.
    pub(super) fn resolve(&self, name: &str) -> Option<String> {
        let mut canonical = String::new();
        let mut expect_index = false;
        for segment in name.split('.') {
            if segment.is_empty() {
                return None;
            }
            let part = if expect_index {
                let index = segment.parse::<usize>().ok()?;
                self.field_arrays.get(&canonical)?.items.get(index)?.to_string()
            } else {
                segment.to_owned()
            };
            if !canonical.is_empty() {
                canonical.push('.');
            }
            canonical.push_str(&part);
            expect_index = self.field_arrays.contains_key(&canonical);
        }
        Some(canonical)
    }

    pub(super) fn display_name(&self, canonical: &str) -> Option<String> {
        let mut prefix = String::new();
        let mut display = String::new();
        for segment in canonical.split('.') {
            let shown = match ItemKey::parse(segment) {
                Some(key) => self
                    .field_arrays
                    .get(&prefix)?
                    .items
                    .iter()
                    .position(|item| *item == key)?
                    .to_string(),
                None => segment.to_owned(),
            };
            if !prefix.is_empty() {
                prefix.push('.');
                display.push('.');
            }
            prefix.push_str(segment);
            display.push_str(&shown);
        }
        Some(display)
    }

    pub(super) fn has_item_segment(canonical: &str) -> bool {
        canonical.split('.').any(|segment| ItemKey::parse(segment).is_some())
    }

    pub(super) fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(super) fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    pub(super) fn allocate_item(&mut self) -> ItemKey {
        self.next_item += 1;
        ItemKey(self.next_item)
    }

    pub(super) fn entry(&self, canonical: &str) -> Option<&dyn StoreEntry> {
        if let Some(field) = self.fields.get(canonical) {
            return Some(field);
        }
        self.field_arrays
            .get(canonical)
            .map(|array| array as &dyn StoreEntry)
    }

    pub(super) fn entry_mut(
        &mut self,
        canonical: &str,
        kind: EntryKind,
    ) -> Option<&mut dyn StoreEntry> {
        match kind {
            EntryKind::Field => self
                .fields
                .get_mut(canonical)
                .map(|field| field as &mut dyn StoreEntry),
            EntryKind::FieldArray => self
                .field_arrays
                .get_mut(canonical)
                .map(|array| array as &mut dyn StoreEntry),
        }
    }

    pub(super) fn seed_field(&mut self, canonical: String, value: Option<Value>) {
        if self.fields.contains_key(&canonical) {
            return;
        }
        let seq = self.next_seq();
        self.fields
            .insert(canonical, FieldRecord::new(seq, value, false));
    }

    // Objects recurse; JSON arrays stay one leaf until registered as a field array.
    pub(super) fn seed_value(&mut self, prefix: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, nested) in map {
                    self.seed_value(&format!("{prefix}.{key}"), nested);
                }
            }
            leaf => self.seed_field(prefix.to_owned(), Some(leaf.clone())),
        }
    }

    pub(super) fn seed_item(&mut self, array: &str, value: Option<&Value>) -> ItemKey {
        let key = self.allocate_item();
        if let Some(value) = value {
            self.seed_value(&format!("{array}.{key}"), value);
        }
        key
    }

    pub(super) fn remove_within(&mut self, prefix: &str) -> usize {
        let before = self.fields.len() + self.field_arrays.len();
        self.fields.retain(|name, _| !is_within(name, prefix));
        self.field_arrays.retain(|name, _| !is_within(name, prefix));
        before - self.fields.len() - self.field_arrays.len()
    }

    /// Arrays are folded deepest first so a nested array's `dirty` is current before its
    /// parent reads it.
    pub(super) fn recompute(&mut self) {
        let mut arrays = self.field_arrays.keys().cloned().collect::<Vec<_>>();
        arrays.sort_by_key(|name| std::cmp::Reverse(depth(name)));
        for name in arrays {
            let structural = self
                .field_arrays
                .get(&name)
                .is_some_and(|array| array.items != array.start_items);
            let nested = structural
                || self
                    .fields
                    .iter()
                    .any(|(field, record)| record.dirty && is_within(field, &name))
                || self.field_arrays.iter().any(|(other, record)| {
                    other != &name && record.dirty && is_within(other, &name)
                });
            if let Some(array) = self.field_arrays.get_mut(&name) {
                array.dirty = nested;
            }
        }

        let entries = self
            .fields
            .values()
            .map(|field| field as &dyn StoreEntry)
            .chain(
                self.field_arrays
                    .values()
                    .map(|array| array as &dyn StoreEntry),
            );
        let (mut invalid, mut dirty, mut touched) = (false, false, false);
        for entry in entries {
            invalid |= !entry.error().is_empty();
            dirty |= entry.is_dirty();
            touched |= entry.is_touched();
        }
        self.invalid = invalid;
        self.dirty = dirty;
        self.touched = touched;
    }

    pub(super) fn first_error_field(&self) -> Option<String> {
        self.fields
            .iter()
            .filter(|(_, field)| !field.error.is_empty())
            .min_by_key(|(_, field)| field.seq)
            .map(|(name, _)| name.clone())
    }

    pub(super) fn field_snapshots(&self) -> BTreeMap<String, FieldSnapshot> {
        self.fields
            .iter()
            .filter_map(|(canonical, field)| {
                let name = self.display_name(canonical)?;
                Some((name.clone(), field.snapshot(name)))
            })
            .collect()
    }

    pub(super) fn field_array_snapshots(&self) -> BTreeMap<String, FieldArraySnapshot> {
        self.field_arrays
            .iter()
            .filter_map(|(canonical, array)| {
                let name = self.display_name(canonical)?;
                Some((name.clone(), array.snapshot(name)))
            })
            .collect()
    }
}
