//! Partition identity for multi-tenant resource routing.
//!
//! A [`PartitionId`] names the storage partition(s) a piece of work is
//! scoped to. It is one of:
//!
//! - **all partitions**: the unscoped value used when partitioning is
//!   disabled or a caller is explicitly cross-partition,
//! - **a set of [`PartitionRef`]s**: one or more concrete partitions,
//!   each carrying a numeric id, a name, or both.
//!
//! A ref with neither id nor name is the *default-partition placeholder*:
//! it stands for "the default partition, whatever that resolves to". The
//! resolution layer replaces placeholders with the configured default id
//! once one is known.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PartitionRef
// ---------------------------------------------------------------------------

/// A reference to a single partition by id, name, or both.
///
/// Values produced by callers are often one-sided (id only, or name only);
/// normalization fills in the missing side from provisioned metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRef {
    id: Option<i32>,
    name: Option<String>,
}

impl PartitionRef {
    /// A ref carrying both sides.
    #[must_use]
    pub fn new(id: Option<i32>, name: Option<String>) -> Self {
        Self { id, name }
    }

    /// A ref identified by numeric id only.
    #[must_use]
    pub fn from_id(id: i32) -> Self {
        Self {
            id: Some(id),
            name: None,
        }
    }

    /// A ref identified by name only.
    #[must_use]
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// The default-partition placeholder: neither id nor name.
    #[must_use]
    pub fn unresolved_default() -> Self {
        Self {
            id: None,
            name: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<i32> {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this ref is the default-partition placeholder.
    #[must_use]
    pub fn is_unresolved_default(&self) -> bool {
        self.id.is_none() && self.name.is_none()
    }
}

impl fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.id, self.name.as_deref()) {
            (Some(id), Some(name)) => write!(f, "{name}#{id}"),
            (Some(id), None) => write!(f, "#{id}"),
            (None, Some(name)) => f.write_str(name),
            (None, None) => f.write_str("(default)"),
        }
    }
}

// ---------------------------------------------------------------------------
// PartitionId
// ---------------------------------------------------------------------------

/// The partition scope of a request or unit of work.
///
/// Structural equality: two values are equal when they name the same
/// partitions the same way. A resolved ref (`#1` with name filled in) is
/// *not* equal to the bare id ref, so callers comparing scopes should
/// compare normalized values.
///
/// # Examples
///
/// ```
/// use cohort_core::partition::PartitionId;
///
/// let scoped = PartitionId::from_id(7);
/// assert!(!scoped.is_all_partitions());
/// assert_eq!(scoped.refs().len(), 1);
///
/// let everything = PartitionId::all_partitions();
/// assert!(everything.is_all_partitions());
/// assert!(everything.refs().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId {
    repr: Repr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Repr {
    All,
    Refs(Vec<PartitionRef>),
}

impl PartitionId {
    /// The unscoped value: no partition filter at all.
    #[must_use]
    pub fn all_partitions() -> Self {
        Self { repr: Repr::All }
    }

    /// The default partition as an unresolved placeholder.
    #[must_use]
    pub fn default_partition() -> Self {
        Self {
            repr: Repr::Refs(vec![PartitionRef::unresolved_default()]),
        }
    }

    /// A single partition by numeric id.
    #[must_use]
    pub fn from_id(id: i32) -> Self {
        Self {
            repr: Repr::Refs(vec![PartitionRef::from_id(id)]),
        }
    }

    /// Multiple partitions by numeric id, in the order given.
    ///
    /// # Panics
    ///
    /// Panics if `ids` is empty. An empty scope has no meaning; use
    /// [`PartitionId::all_partitions`] for "no filter".
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = i32>) -> Self {
        let refs: Vec<PartitionRef> = ids.into_iter().map(PartitionRef::from_id).collect();
        assert!(!refs.is_empty(), "partition id set must not be empty");
        Self {
            repr: Repr::Refs(refs),
        }
    }

    /// A single partition by name.
    #[must_use]
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            repr: Repr::Refs(vec![PartitionRef::from_name(name)]),
        }
    }

    /// Multiple partitions by name, in the order given.
    ///
    /// # Panics
    ///
    /// Panics if `names` is empty.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let refs: Vec<PartitionRef> = names.into_iter().map(PartitionRef::from_name).collect();
        assert!(!refs.is_empty(), "partition name set must not be empty");
        Self {
            repr: Repr::Refs(refs),
        }
    }

    /// A scope built from pre-assembled refs.
    ///
    /// # Panics
    ///
    /// Panics if `refs` is empty.
    #[must_use]
    pub fn from_refs(refs: Vec<PartitionRef>) -> Self {
        assert!(!refs.is_empty(), "partition ref set must not be empty");
        Self {
            repr: Repr::Refs(refs),
        }
    }

    #[must_use]
    pub fn is_all_partitions(&self) -> bool {
        matches!(self.repr, Repr::All)
    }

    /// The refs this scope names. Empty for the all-partitions value.
    #[must_use]
    pub fn refs(&self) -> &[PartitionRef] {
        match &self.repr {
            Repr::All => &[],
            Repr::Refs(refs) => refs,
        }
    }

    /// The single ref, when the scope names exactly one partition.
    #[must_use]
    pub fn single_ref(&self) -> Option<&PartitionRef> {
        match self.refs() {
            [single] => Some(single),
            _ => None,
        }
    }

    /// Numeric ids per ref; `None` where a ref carries no id.
    #[must_use]
    pub fn ids(&self) -> impl Iterator<Item = Option<i32>> + '_ {
        self.refs().iter().map(PartitionRef::id)
    }

    /// Names per ref; `None` where a ref carries no name.
    #[must_use]
    pub fn names(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        self.refs().iter().map(PartitionRef::name)
    }

    /// Whether any ref carries a name.
    #[must_use]
    pub fn has_names(&self) -> bool {
        self.refs().iter().any(|r| r.name().is_some())
    }

    /// Whether any ref is the default-partition placeholder.
    #[must_use]
    pub fn has_unresolved_default(&self) -> bool {
        self.refs().iter().any(PartitionRef::is_unresolved_default)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::All => f.write_str("(all)"),
            Repr::Refs(refs) => {
                for (index, partition_ref) in refs.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{partition_ref}")?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- construction ----

    #[test]
    fn all_partitions_has_no_refs() {
        let all = PartitionId::all_partitions();
        assert!(all.is_all_partitions());
        assert!(all.refs().is_empty());
        assert!(all.single_ref().is_none());
        assert!(!all.has_names());
    }

    #[test]
    fn default_partition_is_a_single_placeholder() {
        let default = PartitionId::default_partition();
        assert!(!default.is_all_partitions());
        assert!(default.has_unresolved_default());
        let single = default.single_ref().unwrap();
        assert!(single.is_unresolved_default());
    }

    #[test]
    fn from_ids_preserves_order() {
        let scope = PartitionId::from_ids([3, 1, 2]);
        let ids: Vec<_> = scope.ids().collect();
        assert_eq!(ids, vec![Some(3), Some(1), Some(2)]);
        assert!(!scope.has_names());
    }

    #[test]
    fn from_names_preserves_order() {
        let scope = PartitionId::from_names(["b", "a"]);
        let names: Vec<_> = scope.names().collect();
        assert_eq!(names, vec![Some("b"), Some("a")]);
        assert!(scope.has_names());
        assert!(!scope.has_unresolved_default());
    }

    #[test]
    #[should_panic(expected = "partition id set must not be empty")]
    fn empty_id_set_panics() {
        let _ = PartitionId::from_ids([]);
    }

    // ---- equality ----

    #[test]
    fn equality_is_structural() {
        assert_eq!(PartitionId::from_id(1), PartitionId::from_id(1));
        assert_ne!(PartitionId::from_id(1), PartitionId::from_id(2));
        assert_ne!(PartitionId::from_id(1), PartitionId::from_name("one"));
        assert_ne!(
            PartitionId::all_partitions(),
            PartitionId::default_partition()
        );
        assert_eq!(
            PartitionId::from_refs(vec![PartitionRef::new(Some(1), Some("one".into()))]),
            PartitionId::from_refs(vec![PartitionRef::new(Some(1), Some("one".into()))]),
        );
        assert_ne!(
            PartitionId::from_refs(vec![PartitionRef::new(Some(1), Some("one".into()))]),
            PartitionId::from_id(1),
        );
    }

    // ---- display ----

    #[test]
    fn display_forms() {
        assert_eq!(PartitionId::all_partitions().to_string(), "(all)");
        assert_eq!(PartitionId::default_partition().to_string(), "(default)");
        assert_eq!(PartitionId::from_id(4).to_string(), "#4");
        assert_eq!(PartitionId::from_name("tenant-a").to_string(), "tenant-a");
        assert_eq!(
            PartitionId::from_refs(vec![
                PartitionRef::new(Some(1), Some("one".into())),
                PartitionRef::from_id(2),
            ])
            .to_string(),
            "one#1,#2"
        );
    }

    // ---- serialization ----

    #[test]
    fn serialized_shape_distinguishes_all_from_default() {
        let all = serde_json::to_value(PartitionId::all_partitions()).unwrap();
        assert_eq!(all, serde_json::json!("all"));

        let default = serde_json::to_value(PartitionId::default_partition()).unwrap();
        assert_eq!(
            default,
            serde_json::json!({ "refs": [{ "id": null, "name": null }] })
        );

        let named: PartitionId =
            serde_json::from_value(serde_json::json!({ "refs": [{ "id": 3, "name": "three" }] }))
                .unwrap();
        assert_eq!(
            named,
            PartitionId::from_refs(vec![PartitionRef::new(Some(3), Some("three".into()))])
        );
    }

    // ---- properties ----

    proptest::proptest! {
        #[test]
        fn from_ids_round_trips_ids(ids in proptest::collection::vec(-100i32..100, 1..8)) {
            let scope = PartitionId::from_ids(ids.clone());
            let back: Vec<i32> = scope.ids().flatten().collect();
            proptest::prop_assert_eq!(back, ids);
        }
    }
}
