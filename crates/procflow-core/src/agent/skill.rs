//! Skills: herramientas locales deterministas.
//!
//! Un step de tipo skill pasa por el mismo camino de ledger y contrato que una
//! tarea de agente; sólo cambia quién produce la salida.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, inputs: &Value) -> Result<Value, String>;
}

type SkillFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// Skill a partir de una closure.
pub struct FnSkill {
    name: String,
    f: Box<SkillFn>,
}

impl FnSkill {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
        where F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static
    {
        Self { name: name.into(),
               f: Box::new(f) }
    }
}

impl Skill for FnSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, inputs: &Value) -> Result<Value, String> {
        (self.f)(inputs)
    }
}

#[derive(Default, Clone)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: impl Skill + 'static) {
        self.skills.insert(skill.name().to_string(), Arc::new(skill));
    }

    pub fn with(mut self, skill: impl Skill + 'static) -> Self {
        self.register(skill);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillRegistry").field("skills", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_resolves_by_name() {
        let reg = SkillRegistry::new().with(FnSkill::new("count", |v| {
                                          Ok(json!({ "count": v["items"].as_array().map_or(0, |a| a.len()) }))
                                      }));
        let skill = reg.get("count").unwrap();
        assert_eq!(skill.run(&json!({"items": [1, 2]})).unwrap(), json!({"count": 2}));
        assert!(reg.get("missing").is_none());
        assert_eq!(reg.names(), vec!["count"]);
    }
}
