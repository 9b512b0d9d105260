//! `Prototype`: a runtime type descriptor used by `Struct` method dispatch
//! and by the `isa`/`derive`/`attach` instruction family.

use crate::value::Atom;

/// A named, single-inheritance-chain type descriptor. Methods are resolved
/// by walking `ancestors` outward from the most-derived prototype, mirroring
/// the original runtime's prototype-registry lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeValue {
    name: Atom,
    ancestors: Vec<Atom>,
    attributes: Vec<Atom>,
    methods: Vec<(Atom, Atom)>,
}

impl PrototypeValue {
    /// A fresh prototype named `name`, with no ancestors, attributes, or
    /// methods yet attached.
    pub fn new(name: Atom) -> Self {
        Self {
            name,
            ancestors: Vec::new(),
            attributes: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// The prototype's own name.
    pub fn name(&self) -> &Atom {
        &self.name
    }

    /// Record `ancestor` as a direct base of this prototype (`derive`).
    pub fn derive(&mut self, ancestor: Atom) {
        if !self.ancestors.contains(&ancestor) {
            self.ancestors.push(ancestor);
        }
    }

    /// Record `attribute` as present on this prototype (`attach`).
    pub fn attach(&mut self, attribute: Atom) {
        if !self.attributes.contains(&attribute) {
            self.attributes.push(attribute);
        }
    }

    /// Bind `method` to the function named `function` on this prototype.
    pub fn bind_method(&mut self, method: Atom, function: Atom) {
        match self.methods.iter().position(|(m, _)| *m == method) {
            Some(index) => self.methods[index].1 = function,
            None => self.methods.push((method, function)),
        }
    }

    /// `true` if `attribute` has been attached directly to this prototype.
    pub fn accepts(&self, attribute: &Atom) -> bool {
        self.attributes.contains(attribute)
    }

    /// `true` if `other` is this prototype's name or a recorded ancestor.
    pub fn resolves_to(&self, other: &Atom) -> bool {
        &self.name == other || self.ancestors.contains(other)
    }

    /// The direct ancestor chain, most-recently-derived first.
    pub fn bases(&self) -> &[Atom] {
        &self.ancestors
    }

    /// Resolve `method` to its bound function name, if attached.
    pub fn resolve_method(&self, method: &Atom) -> Option<&Atom> {
        self.methods.iter().find(|(m, _)| m == method).map(|(_, f)| f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn atom(s: &str) -> Atom {
        Arc::from(s)
    }

    #[test]
    fn resolves_to_includes_ancestors() {
        let mut p = PrototypeValue::new(atom("Derived"));
        p.derive(atom("Base"));
        assert!(p.resolves_to(&atom("Derived")));
        assert!(p.resolves_to(&atom("Base")));
        assert!(!p.resolves_to(&atom("Other")));
    }

    #[test]
    fn bind_method_overwrites_existing_binding() {
        let mut p = PrototypeValue::new(atom("T"));
        p.bind_method(atom("speak"), atom("T::speak/0"));
        p.bind_method(atom("speak"), atom("T::speak/1"));
        assert_eq!(p.resolve_method(&atom("speak")).unwrap(), &atom("T::speak/1"));
    }
}
