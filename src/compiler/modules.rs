use crate::ast::File;
use crate::objects::{Object, ObjectMap};
use std::collections::HashMap;
use std::rc::Rc;

/// An importable module.
#[derive(Debug, Clone)]
pub enum Module {
    /// Host-provided attributes, imported as an immutable map.
    Builtin(ObjectMap),
    /// Script source, compiled into a function whose `export` value is the
    /// result of the import.
    Source(Rc<File>),
}

/// Modules available to `import(name)`.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    modules: HashMap<String, Module>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_builtin_module(&mut self, name: impl Into<String>, attrs: ObjectMap) {
        self.modules.insert(name.into(), Module::Builtin(attrs));
    }

    pub fn add_source_module(&mut self, name: impl Into<String>, file: File) {
        self.modules.insert(name.into(), Module::Source(Rc::new(file)));
    }

    /// Copy every module of `other` into this map, replacing same-named ones.
    pub fn add_map(&mut self, other: &ModuleMap) {
        for (name, module) in &other.modules {
            self.modules.insert(name.clone(), module.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Module> {
        self.modules.remove(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Module {
    /// The constant a builtin module compiles to.
    pub fn builtin_value(attrs: &ObjectMap) -> Object {
        Object::immutable_map(attrs.clone())
    }
}
