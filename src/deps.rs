//! Dependency context: one instance of each skill, bundled and validated at
//! startup, shared read-only by reference with every tool invocation.
//!
//! The context has no mutation methods. Swapping a skill means building a new
//! context and handing the new `Arc` to subsequently started sessions;
//! in-flight turns keep the context they were given.

use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::skills::{DiskSkill, MemorySkill, Skill, SystemSkill};

/// The fixed skill roles the agent wires together.
pub const ROLES: [&str; 3] = ["disk", "memory", "system"];

/// Immutable aggregate of one skill per role.
pub struct SkillContext {
    disk: Arc<DiskSkill>,
    memory: Arc<MemorySkill>,
    system: Arc<SystemSkill>,
}

impl SkillContext {
    pub fn builder() -> SkillContextBuilder {
        SkillContextBuilder::default()
    }

    pub fn disk(&self) -> &DiskSkill {
        &self.disk
    }

    pub fn memory(&self) -> &MemorySkill {
        &self.memory
    }

    pub fn system(&self) -> &SystemSkill {
        &self.system
    }

    /// Dynamic lookup by role name, for capability listings.
    pub fn get(&self, role: &str) -> Result<&dyn Skill> {
        match role {
            "disk" => Ok(self.disk.as_ref()),
            "memory" => Ok(self.memory.as_ref()),
            "system" => Ok(self.system.as_ref()),
            other => Err(AgentError::UnknownRole(other.to_string())),
        }
    }
}

/// Builder that validates the wiring: every role filled exactly once.
#[derive(Default)]
pub struct SkillContextBuilder {
    disk: Option<Arc<DiskSkill>>,
    memory: Option<Arc<MemorySkill>>,
    system: Option<Arc<SystemSkill>>,
}

impl SkillContextBuilder {
    pub fn with_disk(mut self, skill: DiskSkill) -> Result<Self> {
        if self.disk.is_some() {
            return Err(AgentError::Configuration(
                "role 'disk' registered twice".to_string(),
            ));
        }
        self.disk = Some(Arc::new(skill));
        Ok(self)
    }

    pub fn with_memory(mut self, skill: MemorySkill) -> Result<Self> {
        if self.memory.is_some() {
            return Err(AgentError::Configuration(
                "role 'memory' registered twice".to_string(),
            ));
        }
        self.memory = Some(Arc::new(skill));
        Ok(self)
    }

    pub fn with_system(mut self, skill: SystemSkill) -> Result<Self> {
        if self.system.is_some() {
            return Err(AgentError::Configuration(
                "role 'system' registered twice".to_string(),
            ));
        }
        self.system = Some(Arc::new(skill));
        Ok(self)
    }

    pub fn build(self) -> Result<SkillContext> {
        let mut missing = Vec::new();
        if self.disk.is_none() {
            missing.push("disk");
        }
        if self.memory.is_none() {
            missing.push("memory");
        }
        if self.system.is_none() {
            missing.push("system");
        }
        if !missing.is_empty() {
            return Err(AgentError::Configuration(format!(
                "missing skill roles: {}",
                missing.join(", ")
            )));
        }
        // The unwraps above are guarded by the missing check.
        match (self.disk, self.memory, self.system) {
            (Some(disk), Some(memory), Some(system)) => Ok(SkillContext {
                disk,
                memory,
                system,
            }),
            _ => Err(AgentError::Configuration(
                "incomplete skill context".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_builder() -> SkillContextBuilder {
        SkillContext::builder()
    }

    fn temp_memory() -> MemorySkill {
        let dir = tempfile::tempdir().unwrap();
        MemorySkill::new(dir.path().join("agent.db"))
    }

    #[test]
    fn test_build_with_all_roles() {
        let context = full_builder()
            .with_disk(DiskSkill::new())
            .unwrap()
            .with_memory(temp_memory())
            .unwrap()
            .with_system(SystemSkill::new())
            .unwrap()
            .build()
            .unwrap();

        // Every declared role resolves to a skill of the same name.
        for role in ROLES {
            assert_eq!(context.get(role).unwrap().name(), role);
        }
    }

    #[test]
    fn test_missing_role_is_configuration_error() {
        let result = full_builder()
            .with_disk(DiskSkill::new())
            .unwrap()
            .build();
        match result {
            Err(AgentError::Configuration(msg)) => {
                assert!(msg.contains("memory"));
                assert!(msg.contains("system"));
            }
            other => panic!("expected Configuration error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_duplicate_role_is_configuration_error() {
        let result = full_builder()
            .with_disk(DiskSkill::new())
            .unwrap()
            .with_disk(DiskSkill::new());
        match result {
            Err(AgentError::Configuration(msg)) => assert!(msg.contains("disk")),
            other => panic!("expected Configuration error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_role_lookup() {
        let context = full_builder()
            .with_disk(DiskSkill::new())
            .unwrap()
            .with_memory(temp_memory())
            .unwrap()
            .with_system(SystemSkill::new())
            .unwrap()
            .build()
            .unwrap();

        match context.get("network") {
            Err(AgentError::UnknownRole(role)) => assert_eq!(role, "network"),
            other => panic!("expected UnknownRole, got {:?}", other.err()),
        }
    }
}
