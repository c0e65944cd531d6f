//! Global Variable Service & Usage Index (spec.md §4.17).
//!
//! Create/read/edit/delete named scalars. Rename is the critical
//! operation: one database transaction updates the variable row and
//! every referencing row across all block types; only on commit does the
//! variable row change. The Redis-backed usage index is advisory —
//! invalidation failure never rolls back a successful rename.

#[cfg(feature = "postgres")]
pub mod sqlx_repository;
pub mod usage_index;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemprocError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalVariableType {
    Boolean,
    Float,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub id: Uuid,
    pub name: String,
    pub var_type: GlobalVariableType,
    pub is_disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One referencing row discovered by a usage scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRef {
    pub block_kind: String,
    pub block_id: Uuid,
}

/// Direct single-value reference columns: store either a bare name, or
/// the canonical `GV:<name>` form, per spec.md §4.3/§6.
pub(crate) const DIRECT_REFERENCE_COLUMNS: &[(&str, &[&str])] = &[
    ("timeout_blocks", &["input_reference"]),
    ("totalizer_blocks", &["input_reference", "output_reference"]),
    ("formula_blocks", &["output_reference"]),
    ("if_blocks", &["output_reference"]),
    ("deadband_blocks", &["input_reference", "output_reference"]),
    ("rate_of_change_blocks", &["input_reference"]),
    ("statistical_blocks", &["input_reference"]),
    ("write_action_blocks", &["output_reference", "output_value_source_reference"]),
    (
        "pid_tuning_sessions",
        &["setpoint_reference", "process_variable_reference", "output_reference"],
    ),
];

/// JSON array columns holding multiple direct references (Comparison
/// group inputs, Average/MinMax inputs).
pub(crate) const JSON_ARRAY_REFERENCE_COLUMNS: &[(&str, &str)] = &[
    ("comparison_groups", "inputs"),
    ("average_blocks", "inputs"),
    ("minmax_blocks", "inputs"),
];

/// Columns holding alias maps whose values embed `@GV:<name>` markers
/// (Formula aliases, If branch condition aliases).
pub(crate) const ALIAS_MARKER_COLUMNS: &[(&str, &str)] = &[
    ("formula_blocks", "aliases"),
    ("if_blocks", "condition_aliases"),
];

/// Repository interface for Global Variable CRUD, rename, and usage
/// scanning. Concrete CRUD validation lives in an external admin
/// surface out of scope here; this trait exposes only the operations the
/// rename transaction and the processor loop need.
#[async_trait::async_trait]
pub trait GlobalVariableRepository: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<GlobalVariable>, MemprocError>;

    /// Renames `old` to `new`, atomically updating the variable row and
    /// every referencing row in one transaction. On success, returns the
    /// updated variable. Refuses if `new` is already taken.
    async fn rename(&self, old: &str, new: &str) -> Result<GlobalVariable, MemprocError>;

    /// Refused (returns `Configuration` error) while any usage exists.
    async fn delete(&self, name: &str) -> Result<(), MemprocError>;

    /// Finds every block referencing `name`, across all block tables.
    async fn find_usages(&self, name: &str) -> Result<Vec<UsageRef>, MemprocError>;
}
