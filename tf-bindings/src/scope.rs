// SPDX-License-Identifier: Apache-2.0

use crate::{Error, Graph, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Names handed out within one scope level.
#[derive(Debug, Default)]
struct Names {
    ids: Mutex<HashMap<String, usize>>,
}

impl Names {
    /// Returns `name` the first time, then `name_1`, `name_2`, ...
    fn make_unique(&self, name: &str) -> String {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        match ids.get_mut(name) {
            None => {
                ids.insert(name.to_string(), 1);
                name.to_string()
            }
            Some(next) => {
                let unique = format!("{}_{}", name, next);
                *next += 1;
                unique
            }
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '.' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "invalid name: '{}' does not match the regular expression [A-Za-z0-9.][A-Za-z0-9_.\\-]*",
            name
        )))
    }
}

/// Naming context for building operations in a [`Graph`].
///
/// Operation names are unique within a scope level; sub-scopes prefix the
/// names of everything built through them.
#[derive(Debug, Clone)]
pub struct Scope<'g> {
    graph: &'g Graph,
    prefix: Option<String>,
    op_name: Option<String>,
    names: Arc<Names>,
}

impl<'g> Scope<'g> {
    /// Creates the root scope of `graph`.
    pub fn new(graph: &'g Graph) -> Self {
        Scope {
            graph,
            prefix: None,
            op_name: None,
            names: Arc::default(),
        }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    fn qualify(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// Returns a scope whose operations are named under `name/`.
    pub fn with_sub_scope(&self, name: &str) -> Result<Scope<'g>> {
        check_name(name)?;
        let name = self.op_name.as_deref().unwrap_or(name);
        Ok(Scope {
            graph: self.graph,
            prefix: Some(self.qualify(&self.names.make_unique(name))),
            op_name: None,
            names: Arc::default(),
        })
    }

    /// Returns a scope naming the next operation `name`.
    pub fn with_name(&self, name: &str) -> Result<Scope<'g>> {
        check_name(name)?;
        Ok(Scope {
            graph: self.graph,
            prefix: self.prefix.clone(),
            op_name: Some(name.to_string()),
            names: self.names.clone(),
        })
    }

    /// Returns a unique, fully qualified name for a new operation.
    ///
    /// `default_name` is used unless a name was set with
    /// [`with_name`](Self::with_name).
    pub fn make_op_name(&self, default_name: &str) -> Result<String> {
        let name = self.op_name.as_deref().unwrap_or(default_name);
        check_name(name)?;
        Ok(self.qualify(&self.names.make_unique(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names() {
        let graph = Graph::new().unwrap();
        let scope = Scope::new(&graph);

        assert_eq!(scope.make_op_name("Add").unwrap(), "Add");
        assert_eq!(scope.make_op_name("Add").unwrap(), "Add_1");
        assert_eq!(scope.make_op_name("Add").unwrap(), "Add_2");
        assert_eq!(scope.with_name("Add").unwrap().make_op_name("X").unwrap(), "Add_3");
    }

    #[test]
    fn sub_scopes() {
        let graph = Graph::new().unwrap();
        let root = Scope::new(&graph);

        let sub = root.with_sub_scope("sub").unwrap();
        assert_eq!(sub.make_op_name("Const").unwrap(), "sub/Const");
        assert_eq!(
            sub.with_sub_scope("inner").unwrap().make_op_name("Const").unwrap(),
            "sub/inner/Const"
        );

        let again = root.with_sub_scope("sub").unwrap();
        assert_eq!(again.make_op_name("Const").unwrap(), "sub_1/Const");
    }

    #[test]
    fn invalid_names() {
        let graph = Graph::new().unwrap();
        let scope = Scope::new(&graph);

        assert!(scope.with_name("_hidden").is_err());
        assert!(scope.with_sub_scope("a/b").is_err());
        assert!(scope.make_op_name("").is_err());
        assert!(scope.with_name("v1.0-final").is_ok());
    }
}
