//! Invocation spec
//!
//! The immutable bundle of variables, custom functions, and modules handed
//! to the expression engine for one evaluation. Built through
//! [`InvocationSpecBuilder`]; extending an existing spec goes through
//! [`InvocationSpec::to_builder`], which copies and never mutates its
//! source.

use indexmap::IndexMap;

use crate::engine::{Module, NativeFn};
use crate::value::Value;

/// Variables, functions, and modules for one expression evaluation
#[derive(Debug, Clone, Default)]
pub struct InvocationSpec {
    variables: IndexMap<String, Value>,
    functions: Vec<NativeFn>,
    modules: Vec<Module>,
}

impl InvocationSpec {
    /// A spec with no variables, functions, or modules
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> InvocationSpecBuilder {
        InvocationSpecBuilder {
            spec: InvocationSpec::empty(),
        }
    }

    /// A builder seeded with copies of this spec's contents
    pub fn to_builder(&self) -> InvocationSpecBuilder {
        InvocationSpecBuilder { spec: self.clone() }
    }

    /// Variable names in ascending lexicographic order
    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Variable values in the order of [`InvocationSpec::variable_names`]
    pub fn variable_values(&self) -> Vec<Value> {
        self.variable_names()
            .iter()
            .map(|name| self.variables[name].clone())
            .collect()
    }

    pub fn functions(&self) -> &[NativeFn] {
        &self.functions
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Module names in registration order
    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }
}

/// Builder for [`InvocationSpec`]
#[derive(Debug, Clone, Default)]
pub struct InvocationSpecBuilder {
    spec: InvocationSpec,
}

impl InvocationSpecBuilder {
    /// Bind a variable; a later binding of the same name replaces the value
    pub fn add_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.spec.variables.insert(name.into(), value);
        self
    }

    /// Register a custom function
    pub fn add_function(mut self, f: NativeFn) -> Self {
        self.spec.functions.push(f);
        self
    }

    /// Register a module
    pub fn add_module(mut self, m: Module) -> Self {
        self.spec.modules.push(m);
        self
    }

    pub fn build(self) -> InvocationSpec {
        self.spec
    }
}
