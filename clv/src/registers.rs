use std::collections::HashMap;

use crate::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub id: u64,
    pub value: Value,
}

/// Named register store.
///
/// Every allocation takes a fresh id from a counter that only grows, so ids
/// are never reused even after a register is swept and allocated again.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    registers: HashMap<String, Register>,
    next_id: u64,
}

impl RegisterFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the register holding `Unset` if it does not exist yet.
    /// Returns the register's id either way.
    pub fn allocate(&mut self, name: &str) -> u64 {
        if let Some(register) = self.registers.get(name) {
            return register.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.registers.insert(
            name.to_string(),
            Register {
                id,
                value: Value::Unset,
            },
        );
        id
    }

    pub fn write(&mut self, name: &str, value: Value) {
        self.allocate(name);
        if let Some(register) = self.registers.get_mut(name) {
            register.value = value;
        }
    }

    /// The stored value, `Unset` when the register does not exist.
    #[must_use]
    pub fn read(&self, name: &str) -> Value {
        self.registers
            .get(name)
            .map(|register| register.value.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Register> {
        self.registers.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registers.contains_key(name)
    }

    /// Removes every register still holding `Unset` and returns their names
    /// in allocation order.
    ///
    /// This is a sentinel sweep, not reachability: a register that was
    /// allocated but never written is treated as dead.
    pub fn sweep(&mut self) -> Vec<String> {
        let mut evicted: Vec<(u64, String)> = self
            .registers
            .iter()
            .filter(|(_, register)| register.value.is_unset())
            .map(|(name, register)| (register.id, name.clone()))
            .collect();
        evicted.sort_unstable();

        for (_, name) in &evicted {
            self.registers.remove(name);
        }
        evicted.into_iter().map(|(_, name)| name).collect()
    }

    /// Name and value of every register, in allocation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<_> = self.registers.iter().collect();
        entries.sort_unstable_by_key(|(_, register)| register.id);
        entries
            .into_iter()
            .map(|(name, register)| (name.clone(), register.value.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}
