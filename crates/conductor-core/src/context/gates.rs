//! Role and security gates applied after ranking.

use crate::agents::AgentRole;
use conductor_memory::{MemoryCategory, MemoryRecord, SecurityLevel};

/// Effective access tier: the role's tier, optionally lowered by the request.
#[must_use]
pub fn effective_tier(role: AgentRole, ceiling: Option<SecurityLevel>) -> SecurityLevel {
    match ceiling {
        Some(ceiling) => ceiling.min(role.access_tier()),
        None => role.access_tier(),
    }
}

/// Record may be shown at `tier`.
#[must_use]
pub fn passes_security(record: &MemoryRecord, tier: SecurityLevel) -> bool {
    record.security_level <= tier
}

/// Record is inside the role's boundary.
///
/// Categories outside the role's affinity pass only when `requested`
/// names them; excluded tags always reject.
#[must_use]
pub fn passes_role(record: &MemoryRecord, role: AgentRole, requested: &[MemoryCategory]) -> bool {
    let category_ok =
        role.memory_affinity().contains(&record.category) || requested.contains(&record.category);
    category_ok && !role.excluded_tags().iter().any(|t| record.has_tag(t))
}
