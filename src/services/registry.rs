// Operation Registry
//
// Catalogue of operation variants keyed by operation name. The builder is
// the open registration phase run at startup; `freeze()` turns it into an
// immutable registry that is shared read-only between concurrent calls.

use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::RegistrationError;
use crate::models::{
    OperationDescription, OperationHandler, OperationVariant, RankTable, Signature,
    VariantDefinition, VariantDescription,
};

/// What happens when a variant is registered for an existing (operation, signature)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with `RegistrationError::Conflict`
    #[default]
    Reject,
    /// Replace the prior variant, keeping its registration position
    Replace,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" | "error" => Ok(DuplicatePolicy::Reject),
            "replace" | "override" => Ok(DuplicatePolicy::Replace),
            _ => Err(format!("Unsupported duplicate policy: {}", s)),
        }
    }
}

/// Variants of one operation
#[derive(Debug, Clone)]
struct OperationEntry {
    /// Operand shape taken from the first registered variant
    prototype: Signature,
    variants: Vec<Arc<OperationVariant>>,
}

/// Open registry, mutated during the startup registration phase
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    operations: HashMap<String, OperationEntry>,
    /// Operation names in first-registration order
    order: Vec<String>,
    policy: DuplicatePolicy,
    ranks: RankTable,
    next_sequence: u64,
}

impl RegistryBuilder {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            operations: HashMap::new(),
            order: Vec::new(),
            policy,
            ranks: RankTable::default(),
            next_sequence: 0,
        }
    }

    /// Use a custom representation precedence table
    pub fn with_rank_table(mut self, ranks: RankTable) -> Self {
        self.ranks = ranks;
        self
    }

    /// Register `handler` as the variant of `operation` for `signature`
    pub fn register(
        &mut self,
        operation: &str,
        signature: Signature,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<&mut Self, RegistrationError> {
        self.register_variant(VariantDefinition::new(operation, signature, handler))
    }

    /// Register a variant with explicit name, priority or experimental flag
    pub fn register_variant(
        &mut self,
        definition: VariantDefinition,
    ) -> Result<&mut Self, RegistrationError> {
        let operation = definition.operation.clone();

        if let Some(entry) = self.operations.get(&operation) {
            if entry.prototype.len() != definition.signature.len() {
                return Err(RegistrationError::ArityMismatch {
                    operation,
                    signature: definition.signature.to_string(),
                    expected: entry.prototype.len(),
                    found: definition.signature.len(),
                });
            }
        }

        let entry = self.operations.entry(operation.clone()).or_insert_with(|| {
            self.order.push(operation.clone());
            OperationEntry {
                prototype: definition.signature.as_prototype(),
                variants: Vec::new(),
            }
        });

        let existing = entry
            .variants
            .iter()
            .position(|v| v.signature == definition.signature);

        if let Some(name) = &definition.name {
            let taken = entry
                .variants
                .iter()
                .enumerate()
                .any(|(idx, v)| Some(idx) != existing && v.name.as_ref() == Some(name));
            if taken {
                return Err(RegistrationError::NameConflict {
                    operation,
                    name: name.clone(),
                });
            }
        }

        match existing {
            Some(idx) => match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(RegistrationError::Conflict {
                        operation,
                        signature: definition.signature.to_string(),
                    });
                }
                DuplicatePolicy::Replace => {
                    tracing::info!(
                        "Replacing variant {}({}) with a new registration",
                        operation,
                        definition.signature
                    );
                    let replaced = entry.variants[idx].replaced_by(definition);
                    entry.variants[idx] = Arc::new(replaced);
                }
            },
            None => {
                tracing::debug!("Registered variant {}({})", operation, definition.signature);
                let variant = OperationVariant::from_definition(definition, self.next_sequence);
                self.next_sequence += 1;
                entry.variants.push(Arc::new(variant));
            }
        }

        Ok(self)
    }

    /// Remove variants of `operation`; all of them when `signature` is None.
    /// Returns the number of removed variants.
    pub fn remove(&mut self, operation: &str, signature: Option<&Signature>) -> usize {
        let Some(entry) = self.operations.get_mut(operation) else {
            return 0;
        };

        let before = entry.variants.len();
        match signature {
            Some(signature) => entry.variants.retain(|v| &v.signature != signature),
            None => entry.variants.clear(),
        }
        let removed = before - entry.variants.len();

        if entry.variants.is_empty() {
            self.operations.remove(operation);
            self.order.retain(|name| name != operation);
        }

        removed
    }

    /// Close the registration phase
    pub fn freeze(self) -> OperationRegistry {
        tracing::debug!("Registry frozen with {} operations", self.operations.len());
        OperationRegistry {
            operations: self.operations,
            order: self.order,
            policy: self.policy,
            ranks: self.ranks,
            next_sequence: self.next_sequence,
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

/// Frozen registry: read-only, shared between concurrent calls
#[derive(Debug, Clone)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationEntry>,
    order: Vec<String>,
    policy: DuplicatePolicy,
    ranks: RankTable,
    next_sequence: u64,
}

impl OperationRegistry {
    /// Reopen a copy for further registration (plugin loading)
    pub fn to_builder(&self) -> RegistryBuilder {
        RegistryBuilder {
            operations: self.operations.clone(),
            order: self.order.clone(),
            policy: self.policy,
            ranks: self.ranks.clone(),
            next_sequence: self.next_sequence,
        }
    }

    /// Variants of `operation` in registration order
    pub fn variants(&self, operation: &str) -> Option<&[Arc<OperationVariant>]> {
        self.operations.get(operation).map(|e| e.variants.as_slice())
    }

    pub fn prototype(&self, operation: &str) -> Option<&Signature> {
        self.operations.get(operation).map(|e| &e.prototype)
    }

    /// Variant with exactly `signature`
    pub fn variant(
        &self,
        operation: &str,
        signature: &Signature,
    ) -> Option<&Arc<OperationVariant>> {
        self.variants(operation)?
            .iter()
            .find(|v| &v.signature == signature)
    }

    /// Variant registered under an explicit name
    pub fn variant_named(&self, operation: &str, name: &str) -> Option<&Arc<OperationVariant>> {
        self.variants(operation)?
            .iter()
            .find(|v| v.name.as_deref() == Some(name))
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    /// Operation names in first-registration order
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn ranks(&self) -> &RankTable {
        &self.ranks
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Catalogue of all operations, sorted by name
    pub fn describe(&self) -> Vec<OperationDescription> {
        let mut names: Vec<&String> = self.operations.keys().collect();
        names.sort();

        names
            .into_iter()
            .map(|name| {
                let entry = &self.operations[name];
                OperationDescription {
                    name: name.clone(),
                    prototype: entry.prototype.clone(),
                    variants: entry
                        .variants
                        .iter()
                        .map(|v| VariantDescription {
                            label: v.label(),
                            name: v.name.clone(),
                            signature: v.signature.clone(),
                            specificity: v.signature.specificity(&self.ranks),
                            priority: v.priority,
                            experimental: v.experimental,
                        })
                        .collect(),
                }
            })
            .collect()
    }
}
