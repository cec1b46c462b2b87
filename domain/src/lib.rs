use serde::{Deserialize, Serialize}; // For the persisted mapping
use serde_json::Value; // Schema documents are opaque JSON trees
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error; // For domain-specific errors

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Invalid schema name: {0}")]
    InvalidName(String),
    #[error("Schema '{0}' already exists")]
    DuplicateName(String),
    #[error("Schema '{0}' not found")]
    NotFound(String),
    #[error("Merge target '{0}' collides with an existing or pending schema")]
    MergeCollision(String),
    #[error("No merge candidate at index {0}")]
    UnknownCandidate(usize),
}

/// A schema document: any JSON-compatible tree. The store never looks inside it.
pub type SchemaDocument = Value;

// --- Schema Name ---
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaName(String);

impl SchemaName {
    /// Trims the raw input and rejects blank names.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidName(
                "Schema name must not be empty.".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<SchemaName> for String {
    fn from(name: SchemaName) -> Self {
        name.0
    }
}

// --- Schema Set (the persisted mapping) ---

/// The full name -> document mapping. Loaded and saved as one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSet {
    // BTreeMap keeps listing deterministic (sorted by name)
    schemas: BTreeMap<String, SchemaDocument>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SchemaDocument> {
        self.schemas.get(name)
    }

    /// Names in listing order.
    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SchemaDocument)> {
        self.schemas.iter()
    }

    /// Inserts a new schema. Existing entries are never overwritten.
    pub fn insert_new(
        &mut self,
        name: SchemaName,
        document: SchemaDocument,
    ) -> Result<(), DomainError> {
        if self.contains(name.as_str()) {
            return Err(DomainError::DuplicateName(name.into()));
        }
        self.schemas.insert(name.into(), document);
        Ok(())
    }

    /// Removes a schema, returning its document.
    pub fn remove(&mut self, name: &str) -> Result<SchemaDocument, DomainError> {
        self.schemas
            .remove(name)
            .ok_or_else(|| DomainError::NotFound(name.to_string()))
    }

    /// Drops entries whose name is blank and returns the dropped names.
    pub fn drop_blank_names(&mut self) -> Vec<String> {
        let blank: Vec<String> = self
            .schemas
            .keys()
            .filter(|name| name.trim().is_empty())
            .cloned()
            .collect();
        for name in &blank {
            self.schemas.remove(name);
        }
        blank
    }
}

impl FromIterator<(String, SchemaDocument)> for SchemaSet {
    fn from_iter<T: IntoIterator<Item = (String, SchemaDocument)>>(iter: T) -> Self {
        Self {
            schemas: iter.into_iter().collect(),
        }
    }
}

// --- Merge Planning ---

/// Suffix appended to a conflicting name to build the default replacement.
pub const MERGED_SUFFIX: &str = "_merged";

/// One incoming entry of a merge batch, with its proposed target name.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCandidate {
    /// Index of the source mapping the entry came from.
    pub source: usize,
    /// Name as found in the source.
    pub name: String,
    pub document: SchemaDocument,
    /// True when `name` was already taken by the store or an earlier entry.
    pub conflict: bool,
    /// Target name if the caller doesn't override it. Equals `name` when there is no conflict.
    pub suggested_name: String,
}

/// Outcome for a single committed merge entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedEntry {
    pub name: String,
    pub stored_as: String,
    pub renamed: bool,
}

/// Builds `{name}_merged`, falling back to `{name}_merged_2`, `_3`, ... while taken.
pub fn suggest_name(name: &str, taken: &HashSet<String>) -> String {
    let base = format!("{name}{MERGED_SUFFIX}");
    if !taken.contains(&base) {
        return base;
    }
    let mut counter = 2usize;
    loop {
        let candidate = format!("{base}_{counter}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Plans a merge of `incoming` sources into `existing` without touching either.
///
/// Entries are visited source by source, in each source's listing order. A name
/// conflicts if the store already holds it or an earlier entry of the batch
/// claimed it; every suggested name is itself checked against the same set.
pub fn resolve_conflicts(existing: &SchemaSet, incoming: &[SchemaSet]) -> Vec<MergeCandidate> {
    let mut taken: HashSet<String> = existing.schemas.keys().cloned().collect();
    let mut candidates = Vec::new();

    for (source, set) in incoming.iter().enumerate() {
        for (name, document) in set.iter() {
            let conflict = taken.contains(name);
            let suggested_name = if conflict {
                suggest_name(name, &taken)
            } else {
                name.clone()
            };
            taken.insert(suggested_name.clone());
            candidates.push(MergeCandidate {
                source,
                name: name.clone(),
                document: document.clone(),
                conflict,
                suggested_name,
            });
        }
    }
    candidates
}

/// Commits a merge plan into `existing`.
///
/// `renames` maps a candidate index to a caller-chosen target name. All final
/// targets are validated before anything is inserted, so on error `existing`
/// is left unchanged.
pub fn apply_merge(
    existing: &mut SchemaSet,
    candidates: Vec<MergeCandidate>,
    renames: &HashMap<usize, String>,
) -> Result<Vec<MergedEntry>, DomainError> {
    if let Some(&index) = renames.keys().find(|&&index| index >= candidates.len()) {
        return Err(DomainError::UnknownCandidate(index));
    }

    let mut taken: HashSet<String> = existing.schemas.keys().cloned().collect();
    let mut targets = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        let target = match renames.get(&index) {
            Some(raw) => String::from(SchemaName::parse(raw)?),
            None => candidate.suggested_name.clone(),
        };
        if !taken.insert(target.clone()) {
            return Err(DomainError::MergeCollision(target));
        }
        targets.push(target);
    }

    let mut merged = Vec::with_capacity(candidates.len());
    for (candidate, target) in candidates.into_iter().zip(targets) {
        merged.push(MergedEntry {
            renamed: target != candidate.name,
            name: candidate.name,
            stored_as: target.clone(),
        });
        existing.schemas.insert(target, candidate.document);
    }
    Ok(merged)
}
